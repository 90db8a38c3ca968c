//! The buyer-facing facade.

use crate::admin::BackOffice;
use crate::allocator::RandomAllocator;
use crate::availability::AvailabilityIndex;
use crate::commit::{CommitReport, ReservationCommitProtocol};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::retry::retry_store_read;
use crate::selector::{ManualSelector, Toggle};
use crate::session::BuyerSession;
use raffle_core::environment::Clock;
use raffle_core::{
    fetch_all, AvailabilitySet, Buyer, DateTime, Page, Phone, SelectionBatch, SelectionMode,
    SortOrder, Ticket, TicketFilter, TicketNumber, TicketStatus, TicketStore, Utc, KEYSPACE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How far the raffle has sold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesProgress {
    /// Paid tickets.
    pub paid: u64,
    /// Size of the keyspace.
    pub total: u64,
    /// `paid / total` as a percentage.
    pub percent: f64,
    /// `percent` clamped to `1..=100` for a progress bar that never looks empty.
    pub display_percent: f64,
}

/// A ticket as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedTicket {
    /// The stored row.
    pub ticket: Ticket,
    /// When an unpaid reservation lapses; `None` once paid.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the reservation has already lapsed.
    pub expired: bool,
}

/// Ticket allocation and reservation engine.
///
/// Cheap to clone; clones share the store and clock. All per-buyer state lives
/// in [`BuyerSession`], so one engine serves any number of concurrent buyers.
///
/// # Example
///
/// ```
/// use raffle_engine::{BuyerSession, EngineConfig, RaffleEngine};
/// use raffle_testing::{fixtures, mocks::test_clock, InMemoryTicketStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), raffle_engine::EngineError> {
/// let engine = RaffleEngine::new(
///     Arc::new(InMemoryTicketStore::new()),
///     Arc::new(test_clock()),
///     EngineConfig::default(),
/// );
/// let mut session = BuyerSession::with_seed(fixtures::buyer(1), 42);
///
/// engine.draw_lucky(&mut session, 3).await?;
/// let report = engine.commit(&mut session).await?;
/// assert_eq!(report.confirmed.len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RaffleEngine {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl RaffleEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Administrative operations over the same store.
    #[must_use]
    pub fn back_office(&self) -> BackOffice {
        BackOffice::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.clone(),
        )
    }

    fn index(&self) -> AvailabilityIndex<'_> {
        AvailabilityIndex::new(self.store.as_ref(), &self.config)
    }

    fn check_quantity(&self, quantity: usize) -> Result<()> {
        if quantity == 0 || quantity > self.config.max_quantity {
            return Err(EngineError::InvalidQuantity {
                requested: quantity,
                max: self.config.max_quantity,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------

    /// Re-reads the unavailable set into the session; returns the free count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`]; the previous snapshot is kept.
    pub async fn refresh_availability(&self, session: &mut BuyerSession) -> Result<usize> {
        let snapshot = self.index().refresh(self.clock.now()).await?;
        let free = snapshot.free_count();
        session.availability = Some(snapshot);
        Ok(free)
    }

    // ------------------------------------------------------------------
    // Lucky mode
    // ------------------------------------------------------------------

    /// Starts a lucky selection of `quantity` random free numbers.
    ///
    /// Replaces any pending selection. Availability is refreshed first.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidQuantity`], [`EngineError::KeyspaceExhausted`] or
    /// [`EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self, session), fields(phone = %session.buyer.phone))]
    pub async fn draw_lucky(
        &self,
        session: &mut BuyerSession,
        quantity: usize,
    ) -> Result<Vec<TicketNumber>> {
        self.check_quantity(quantity)?;
        self.refresh_availability(session).await?;

        let drawn = self.draw_into(session, quantity, &[]).await?;
        let mut batch = SelectionBatch::new(SelectionMode::Lucky, quantity);
        for number in &drawn {
            batch.insert(*number);
        }
        session.selection = Some(batch);
        Ok(drawn)
    }

    /// Draws the numbers missing from the pending selection, keeping those
    /// already in it. Returns only the new numbers.
    ///
    /// Used after [`EngineError::NeedsRepair`] or [`EngineError::PartialCommit`].
    ///
    /// # Errors
    ///
    /// [`EngineError::NoSelection`], [`EngineError::KeyspaceExhausted`] or
    /// [`EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self, session), fields(phone = %session.buyer.phone))]
    pub async fn top_up_lucky(&self, session: &mut BuyerSession) -> Result<Vec<TicketNumber>> {
        let (remaining, keep) = {
            let batch = session.selection.as_ref().ok_or(EngineError::NoSelection)?;
            (batch.remaining(), batch.numbers().to_vec())
        };
        if remaining == 0 {
            return Ok(Vec::new());
        }
        self.refresh_availability(session).await?;

        let drawn = self.draw_into(session, remaining, &keep).await?;
        if let Some(batch) = session.selection.as_mut() {
            for number in &drawn {
                batch.insert(*number);
            }
        }
        Ok(drawn)
    }

    async fn draw_into(
        &self,
        session: &mut BuyerSession,
        quantity: usize,
        keep: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>> {
        let now = self.clock.now();
        let BuyerSession {
            availability, rng, ..
        } = session;
        let snapshot = availability.get_or_insert_with(|| AvailabilitySet::empty(now));
        RandomAllocator::new(self.index(), &self.config)
            .draw(quantity, snapshot, keep, rng, now)
            .await
    }

    // ------------------------------------------------------------------
    // Manual mode
    // ------------------------------------------------------------------

    /// Starts an empty manual selection targeting `quantity` numbers.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidQuantity`] or [`EngineError::StoreUnavailable`].
    pub async fn start_manual(&self, session: &mut BuyerSession, quantity: usize) -> Result<()> {
        self.check_quantity(quantity)?;
        self.refresh_availability(session).await?;
        session.selection = Some(SelectionBatch::new(SelectionMode::Manual, quantity));
        Ok(())
    }

    /// Adds or removes `number` using the cached availability.
    ///
    /// # Errors
    ///
    /// See [`ManualSelector::toggle`].
    #[allow(clippy::unused_self)]
    pub fn toggle(&self, session: &mut BuyerSession, number: TicketNumber) -> Result<Toggle> {
        ManualSelector::toggle(session, number)
    }

    /// Adds a typed-in number after a fresh store check.
    ///
    /// # Errors
    ///
    /// See [`ManualSelector::add_by_number`].
    pub async fn add_by_number(
        &self,
        session: &mut BuyerSession,
        raw: &str,
    ) -> Result<TicketNumber> {
        ManualSelector::new(self.index())
            .add_by_number(session, raw, self.clock.now())
            .await
    }

    /// Removes `number` from the selection.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoSelection`].
    #[allow(clippy::unused_self)]
    pub fn remove(&self, session: &mut BuyerSession, number: TicketNumber) -> Result<bool> {
        ManualSelector::remove(session, number)
    }

    /// Free numbers from `start` onward for the number grid.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn browse(
        &self,
        session: &BuyerSession,
        start: TicketNumber,
        limit: usize,
    ) -> Vec<TicketNumber> {
        ManualSelector::browse(session, start, limit)
    }

    /// Whether the pending selection is exactly full, i.e. committable.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn selection_is_full(&self, session: &BuyerSession) -> bool {
        session
            .selection
            .as_ref()
            .is_some_and(|batch| !batch.is_empty() && batch.is_full())
    }

    // ------------------------------------------------------------------
    // Commit and buyer operations
    // ------------------------------------------------------------------

    /// Commits the pending selection.
    ///
    /// # Errors
    ///
    /// See [`ReservationCommitProtocol::commit`].
    pub async fn commit(&self, session: &mut BuyerSession) -> Result<CommitReport> {
        ReservationCommitProtocol::new(self.store.as_ref(), &self.config)
            .commit(session, self.clock.now())
            .await
    }

    /// Deletes the buyer's unpaid reservations; returns how many.
    ///
    /// # Errors
    ///
    /// [`EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self, buyer), fields(phone = %buyer.phone))]
    pub async fn cancel_reservations(&self, buyer: &Buyer) -> Result<u64> {
        let filter = TicketFilter::all()
            .status(TicketStatus::Reserved)
            .phone(buyer.phone.clone());
        let deleted = self.store.delete(filter).await?;
        tracing::info!(deleted, "Reservations cancelled");
        Ok(deleted)
    }

    /// The details last used with `phone`, for auto-fill on a repeat visit.
    ///
    /// # Errors
    ///
    /// [`EngineError::StoreUnavailable`].
    pub async fn lookup_buyer(&self, phone: &Phone) -> Result<Option<Buyer>> {
        let filter = TicketFilter::all().phone(phone.clone());
        let rows = retry_store_read(self.config.retry_policy(), "lookup_buyer", || {
            self.store
                .query(filter.clone(), SortOrder::NewestFirst, Page::first(1))
        })
        .await?;
        Ok(rows.into_iter().next().map(|t| t.owner))
    }

    /// Every ticket held by `phone`, newest first, with expiry details.
    ///
    /// # Errors
    ///
    /// [`EngineError::StoreUnavailable`].
    pub async fn tickets_for(&self, phone: &Phone) -> Result<Vec<OwnedTicket>> {
        let filter = TicketFilter::all().phone(phone.clone());
        let mut rows = retry_store_read(self.config.retry_policy(), "tickets_for", || {
            fetch_all(self.store.as_ref(), filter.clone(), self.config.page_size)
        })
        .await?;
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.number.cmp(&b.number))
        });

        let now = self.clock.now();
        let ttl = self.config.reservation_ttl();
        Ok(rows
            .into_iter()
            .map(|ticket| {
                let expires_at = (ticket.status == TicketStatus::Reserved)
                    .then(|| ticket.created_at + ttl);
                OwnedTicket {
                    expired: expires_at.is_some_and(|at| at < now),
                    expires_at,
                    ticket,
                }
            })
            .collect())
    }

    /// Paid tickets as a share of the keyspace.
    ///
    /// # Errors
    ///
    /// [`EngineError::StoreUnavailable`].
    #[allow(clippy::cast_precision_loss)]
    pub async fn sales_progress(&self) -> Result<SalesProgress> {
        let filter = TicketFilter::all().status(TicketStatus::Paid);
        let paid = retry_store_read(self.config.retry_policy(), "count_paid", || {
            self.store.count(filter.clone())
        })
        .await?;
        let total = u64::from(KEYSPACE_SIZE);
        let percent = paid as f64 / total as f64 * 100.0;
        Ok(SalesProgress {
            paid,
            total,
            percent,
            display_percent: percent.clamp(1.0, 100.0),
        })
    }
}
