//! Back-office operations: payment confirmation, release, cleanup.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::retry::retry_store_read;
use raffle_core::environment::Clock;
use raffle_core::{
    Page, Phone, SortOrder, Ticket, TicketFilter, TicketStatus, TicketStore, KEYSPACE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Row counts by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStats {
    /// Paid tickets.
    pub paid: u64,
    /// Reservations still within the TTL.
    pub reserved: u64,
    /// Reservations past the TTL that still occupy a row.
    pub expired: u64,
    /// Numbers nobody holds.
    pub free: u64,
}

/// Administrative operations. Not exposed to buyers.
#[derive(Clone)]
pub struct BackOffice {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl BackOffice {
    /// Back office over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    async fn count(&self, name: &'static str, filter: TicketFilter) -> Result<u64> {
        retry_store_read(self.config.retry_policy(), name, || {
            self.store.count(filter.clone())
        })
        .await
    }

    /// Counts paid, live reserved and expired reserved rows.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    pub async fn stats(&self) -> Result<TicketStats> {
        let cutoff = self.config.expiry_cutoff(self.clock.now());
        let paid = self
            .count("count_paid", TicketFilter::all().status(TicketStatus::Paid))
            .await?;
        let reserved = self
            .count(
                "count_reserved",
                TicketFilter::all()
                    .status(TicketStatus::Reserved)
                    .live_since(cutoff),
            )
            .await?;
        let expired = self
            .count("count_expired", TicketFilter::all().expired_before(cutoff))
            .await?;

        Ok(TicketStats {
            paid,
            reserved,
            expired,
            free: u64::from(KEYSPACE_SIZE).saturating_sub(paid + reserved),
        })
    }

    /// Marks every reservation the buyer still holds a row for as paid;
    /// returns how many.
    ///
    /// Reservations past the TTL are included while their row exists: nobody
    /// else can hold those numbers until the row is reclaimed.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self, phone), fields(phone = %phone))]
    pub async fn mark_paid(&self, phone: &Phone) -> Result<u64> {
        let cutoff = self.config.expiry_cutoff(self.clock.now());
        let held = TicketFilter::all()
            .status(TicketStatus::Reserved)
            .phone(phone.clone());
        let late = self
            .store
            .update_status(held.clone().expired_before(cutoff), TicketStatus::Paid)
            .await?;
        let on_time = self
            .store
            .update_status(held.live_since(cutoff), TicketStatus::Paid)
            .await?;
        if late > 0 {
            tracing::warn!(late, "Expired reservations marked paid before reclaim");
        }
        tracing::info!(updated = late + on_time, "Reservations marked paid");
        Ok(late + on_time)
    }

    /// Deletes every row held by the buyer, paid or not; returns how many.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self, phone), fields(phone = %phone))]
    pub async fn release(&self, phone: &Phone) -> Result<u64> {
        let deleted = self.store.delete(TicketFilter::all().phone(phone.clone())).await?;
        tracing::info!(deleted, "Buyer tickets released");
        Ok(deleted)
    }

    /// Deletes every expired reservation; returns how many.
    ///
    /// Expired rows are already invisible to every read path, so this only
    /// compacts storage. Commits reclaim the rows they need on their own.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    pub async fn reclaim_expired(&self) -> Result<u64> {
        let cutoff = self.config.expiry_cutoff(self.clock.now());
        let deleted = self
            .store
            .delete(TicketFilter::all().expired_before(cutoff))
            .await?;
        tracing::info!(deleted, %cutoff, "Expired reservations reclaimed");
        Ok(deleted)
    }

    /// One page of rows, newest first, for the admin listing. `status`
    /// narrows it to paid or reserved rows.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    pub async fn recent(&self, status: Option<TicketStatus>, page: Page) -> Result<Vec<Ticket>> {
        let filter = listing(status);
        retry_store_read(self.config.retry_policy(), "recent_tickets", || {
            self.store
                .query(filter.clone(), SortOrder::NewestFirst, page)
        })
        .await
    }

    /// One page of rows whose buyer name, phone or number contains `term`,
    /// newest first, optionally narrowed by `status`.
    ///
    /// # Errors
    ///
    /// [`crate::EngineError::StoreUnavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn search(
        &self,
        term: &str,
        status: Option<TicketStatus>,
        page: Page,
    ) -> Result<Vec<Ticket>> {
        let filter = listing(status).text(term);
        retry_store_read(self.config.retry_policy(), "search_tickets", || {
            self.store
                .query(filter.clone(), SortOrder::NewestFirst, page)
        })
        .await
    }
}

fn listing(status: Option<TicketStatus>) -> TicketFilter {
    match status {
        Some(status) => TicketFilter::all().status(status),
        None => TicketFilter::all(),
    }
}
