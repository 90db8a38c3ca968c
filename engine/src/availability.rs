//! Availability index: materializes the unavailable set from the store.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::metrics;
use crate::retry::retry_store_read;
use raffle_core::{
    fetch_all, AvailabilitySet, DateTime, Ticket, TicketFilter, TicketNumber, TicketStore, Utc,
};

/// Read side of the engine.
///
/// Every read applies the reservation TTL itself: an expired `reserved` row is
/// never reported as unavailable, even though it still exists in the store.
#[derive(Clone, Copy)]
pub struct AvailabilityIndex<'a> {
    store: &'a dyn TicketStore,
    config: &'a EngineConfig,
}

impl<'a> AvailabilityIndex<'a> {
    /// Index over `store`.
    #[must_use]
    pub const fn new(store: &'a dyn TicketStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Reads every live row and returns the unavailable set as of `now`.
    ///
    /// A failed page aborts the whole refresh (after retries); a partial set
    /// would under-report taken numbers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::StoreUnavailable`] if any page fails.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<AvailabilitySet> {
        let filter = TicketFilter::all().live_since(self.config.expiry_cutoff(now));
        let rows = retry_store_read(self.config.retry_policy(), "refresh_availability", || {
            fetch_all(self.store, filter.clone(), self.config.page_size)
        })
        .await?;

        let snapshot = AvailabilitySet::from_numbers(rows.iter().map(|t| t.number), now);
        metrics::record_refresh(snapshot.len());
        tracing::debug!(
            unavailable = snapshot.len(),
            free = snapshot.free_count(),
            "Availability refreshed"
        );
        Ok(snapshot)
    }

    /// Live rows for the given numbers, read fresh from the store.
    ///
    /// The numbers are checked in chunks no larger than a read page.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::StoreUnavailable`] if a read fails.
    pub async fn live_rows(
        &self,
        numbers: &[TicketNumber],
        now: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let cutoff = self.config.expiry_cutoff(now);
        let chunk_size = self.page_size();
        let mut live = Vec::new();

        for chunk in numbers.chunks(chunk_size) {
            let filter = TicketFilter::all().numbers(chunk.to_vec()).live_since(cutoff);
            let rows = retry_store_read(self.config.retry_policy(), "check_numbers", || {
                fetch_all(self.store, filter.clone(), chunk_size)
            })
            .await?;
            live.extend(rows);
        }

        Ok(live)
    }

    /// Whether `number` is free right now according to the store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::StoreUnavailable`] if the read fails. A
    /// failed read never counts as free.
    pub async fn is_free(&self, number: TicketNumber, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.live_rows(&[number], now).await?.is_empty())
    }

    fn page_size(&self) -> usize {
        self.config.page_size.min(self.store.max_page_size()).max(1)
    }
}
