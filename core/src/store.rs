//! Ticket store trait and its query vocabulary.
//!
//! The store is the remote persistence layer. It offers only independent
//! read/insert/update/delete operations plus a uniqueness constraint on the
//! ticket number; there are no client-visible multi-row transactions. The engine
//! builds its optimistic-concurrency protocol on top of exactly this surface.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `raffle-postgres`): production implementation
//! - `InMemoryTicketStore` (in `raffle-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! engine can hold an `Arc<dyn TicketStore>`.

use crate::ticket::{Phone, Ticket, TicketNumber, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed, sendable future returned by store methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by a ticket store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The operation could not complete (network, pool, or server failure).
    ///
    /// The outcome of a write that fails this way is unknown.
    #[error("ticket store unavailable: {0}")]
    Unavailable(String),

    /// An insert hit the uniqueness constraint on the ticket number.
    ///
    /// The whole batch was rejected; `numbers` lists the rows of that batch.
    #[error("uniqueness violation for {} ticket(s)", numbers.len())]
    UniqueViolation {
        /// Numbers of the rejected batch.
        numbers: Vec<TicketNumber>,
    },

    /// A stored row could not be decoded into a [`Ticket`].
    #[error("invalid ticket row: {0}")]
    InvalidRow(String),
}

/// Liveness condition derived from the reservation TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    /// `status = paid OR (status = reserved AND created_at >= cutoff)`.
    LiveSince(DateTime<Utc>),
    /// `status = reserved AND created_at < cutoff`.
    ExpiredBefore(DateTime<Utc>),
}

/// Conjunctive filter over ticket rows. An empty filter matches every row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFilter {
    /// Status equality.
    pub status: Option<TicketStatus>,
    /// Owner phone equality.
    pub phone: Option<Phone>,
    /// Number membership.
    pub numbers: Option<Vec<TicketNumber>>,
    /// Strict lower bound on the number, for keyset pagination.
    pub number_after: Option<TicketNumber>,
    /// TTL-derived liveness condition.
    pub liveness: Option<Liveness>,
    /// Case-insensitive substring of the owner name, owner phone or number.
    pub text: Option<String>,
}

impl TicketFilter {
    /// Matches every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a status.
    #[must_use]
    pub const fn status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to one owner.
    #[must_use]
    pub fn phone(mut self, phone: Phone) -> Self {
        self.phone = Some(phone);
        self
    }

    /// Restrict to a set of numbers.
    #[must_use]
    pub fn numbers(mut self, numbers: Vec<TicketNumber>) -> Self {
        self.numbers = Some(numbers);
        self
    }

    /// Restrict to numbers strictly greater than `number`.
    #[must_use]
    pub const fn after(mut self, number: TicketNumber) -> Self {
        self.number_after = Some(number);
        self
    }

    /// Only rows that make their number unavailable at `cutoff = now - ttl`.
    #[must_use]
    pub const fn live_since(mut self, cutoff: DateTime<Utc>) -> Self {
        self.liveness = Some(Liveness::LiveSince(cutoff));
        self
    }

    /// Only reserved rows that expired before `cutoff = now - ttl`.
    #[must_use]
    pub const fn expired_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.liveness = Some(Liveness::ExpiredBefore(cutoff));
        self
    }

    /// Restrict to rows whose owner name, phone or number contains `term`,
    /// ignoring case. A blank term is ignored.
    #[must_use]
    pub fn text(mut self, term: &str) -> Self {
        let term = term.trim();
        self.text = (!term.is_empty()).then(|| term.to_lowercase());
        self
    }

    /// Evaluates the filter against a row.
    ///
    /// Stores that cannot push filtering down (or test doubles) use this to
    /// share one definition of the semantics.
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self.phone.as_ref().is_some_and(|p| *p != ticket.owner.phone) {
            return false;
        }
        if self
            .numbers
            .as_ref()
            .is_some_and(|numbers| !numbers.contains(&ticket.number))
        {
            return false;
        }
        if self.number_after.is_some_and(|after| ticket.number <= after) {
            return false;
        }
        if let Some(term) = &self.text {
            let hit = ticket.owner.name.to_lowercase().contains(term.as_str())
                || ticket.owner.phone.as_str().contains(term.as_str())
                || ticket.number.to_string().contains(term.as_str());
            if !hit {
                return false;
            }
        }
        match self.liveness {
            Some(Liveness::LiveSince(cutoff)) => ticket.is_live(cutoff),
            Some(Liveness::ExpiredBefore(cutoff)) => {
                ticket.status == TicketStatus::Reserved && ticket.created_at < cutoff
            }
            None => true,
        }
    }
}

/// Offset/limit window over a query result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return. Stores clamp this to their own cap.
    pub limit: usize,
}

impl Page {
    /// The first `limit` rows.
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// The window following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Result ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending ticket number; stable, used for keyset pagination.
    #[default]
    NumberAscending,
    /// Most recent `created_at` first, ties broken by number.
    NewestFirst,
}

/// Remote persistence for ticket rows.
///
/// # Guarantees required of implementations
///
/// - At most one row per ticket number (uniqueness constraint).
/// - A single `insert_batch` is all-or-nothing: on a uniqueness violation no
///   row of the batch is persisted and [`StoreError::UniqueViolation`] is
///   returned.
/// - `query` never returns more than [`TicketStore::max_page_size`] rows.
pub trait TicketStore: Send + Sync {
    /// Rows matching `filter`, ordered, windowed by `page`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the read fails.
    fn query(
        &self,
        filter: TicketFilter,
        order: SortOrder,
        page: Page,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>>;

    /// Number of rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the read fails.
    fn count(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Inserts `rows` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if any number already exists
    /// (nothing is written), or [`StoreError::Unavailable`] if the outcome is
    /// unknown.
    fn insert_batch(&self, rows: Vec<Ticket>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Sets `status` on every row matching `filter`, returning rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the write fails.
    fn update_status(
        &self,
        filter: TicketFilter,
        status: TicketStatus,
    ) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Deletes every row matching `filter`, returning rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the write fails.
    fn delete(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Largest page `query` will return.
    fn max_page_size(&self) -> usize {
        1000
    }

    /// Largest batch `insert_batch` accepts in one request.
    fn max_insert_rows(&self) -> usize {
        500
    }
}

/// Reads every row matching `filter`, hiding the store's page cap.
///
/// Pages with a keyset on the ticket number rather than an offset, so rows
/// inserted by other writers mid-scan cannot shift later pages. Stops at the
/// first short page. Any page error aborts the scan; partial results are
/// discarded.
///
/// # Errors
///
/// Propagates the first store error.
pub async fn fetch_all<S>(
    store: &S,
    filter: TicketFilter,
    page_size: usize,
) -> Result<Vec<Ticket>, StoreError>
where
    S: TicketStore + ?Sized,
{
    let limit = page_size.min(store.max_page_size()).max(1);
    let mut rows = Vec::new();
    let mut cursor = filter.number_after;

    loop {
        let mut page_filter = filter.clone();
        page_filter.number_after = cursor;

        let page = store
            .query(page_filter, SortOrder::NumberAscending, Page::first(limit))
            .await?;
        let fetched = page.len();
        cursor = page.last().map(|t| t.number).or(cursor);
        rows.extend(page);

        if fetched < limit {
            return Ok(rows);
        }
    }
}
