//! In-memory `TicketStore` for fast, deterministic tests.

use raffle_core::{
    BoxFuture, Page, SortOrder, StoreError, Ticket, TicketFilter, TicketNumber, TicketStatus,
    TicketStore,
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

const DEFAULT_PAGE_CAP: usize = 1000;
const DEFAULT_INSERT_CAP: usize = 500;

#[derive(Debug, Default)]
struct Faults {
    queries: usize,
    counts: usize,
    inserts: usize,
    writes: usize,
    /// Countdown to the insert whose rows land but whose reply is lost.
    lost_ack: usize,
    /// Queries that fail once the lost reply fires.
    reads_after_lost_ack: usize,
}

/// Number of calls received per operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    /// `query` calls.
    pub queries: usize,
    /// `count` calls.
    pub counts: usize,
    /// `insert_batch` calls.
    pub inserts: usize,
    /// `update_status` calls.
    pub updates: usize,
    /// `delete` calls.
    pub deletes: usize,
}

#[derive(Debug)]
struct Inner {
    rows: BTreeMap<TicketNumber, Ticket>,
    page_cap: usize,
    insert_cap: usize,
    faults: Faults,
    /// Rows another buyer commits just before our next insert lands.
    racing_rows: Vec<Ticket>,
    calls: CallCounts,
}

/// In-memory ticket store.
///
/// Enforces the same contract as the production store: one row per number,
/// all-or-nothing batch inserts, capped pages. Every operation yields to the
/// scheduler first, so concurrent sessions interleave between store calls the
/// way they would against a remote database.
///
/// Clones share the same rows.
///
/// # Example
///
/// ```
/// use raffle_core::{Page, SortOrder, TicketFilter, TicketStore};
/// use raffle_testing::{fixtures, InMemoryTicketStore};
///
/// # async fn example() -> Result<(), raffle_core::StoreError> {
/// let store = InMemoryTicketStore::new();
/// store
///     .insert_batch(vec![fixtures::reserved_row(7, &fixtures::buyer(1), fixtures::epoch())])
///     .await?;
///
/// let rows = store
///     .query(TicketFilter::all(), SortOrder::NumberAscending, Page::first(10))
///     .await?;
/// assert_eq!(rows.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTicketStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryTicketStore {
    /// Empty store with the default limits (1000-row pages, 500-row inserts).
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PAGE_CAP, DEFAULT_INSERT_CAP)
    }

    /// Empty store with custom page and insert caps.
    #[must_use]
    pub fn with_limits(page_cap: usize, insert_cap: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                rows: BTreeMap::new(),
                page_cap: page_cap.max(1),
                insert_cap: insert_cap.max(1),
                faults: Faults::default(),
                racing_rows: Vec::new(),
                calls: CallCounts::default(),
            })),
        }
    }

    /// Writes rows directly, replacing any existing row with the same number.
    pub fn seed(&self, rows: impl IntoIterator<Item = Ticket>) {
        let mut inner = self.inner.write().unwrap();
        for row in rows {
            inner.rows.insert(row.number, row);
        }
    }

    /// All rows in number order.
    #[must_use]
    pub fn rows(&self) -> Vec<Ticket> {
        self.inner.read().unwrap().rows.values().cloned().collect()
    }

    /// The row for `number`, if any.
    #[must_use]
    pub fn get(&self, number: TicketNumber) -> Option<Ticket> {
        self.inner.read().unwrap().rows.get(&number).cloned()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().rows.len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().rows.is_empty()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.inner.read().unwrap().calls
    }

    /// The next `n` `query` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_queries(&self, n: usize) {
        self.inner.write().unwrap().faults.queries = n;
    }

    /// The next `n` `count` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_counts(&self, n: usize) {
        self.inner.write().unwrap().faults.counts = n;
    }

    /// The next `n` `insert_batch` calls fail with [`StoreError::Unavailable`]
    /// without writing anything.
    pub fn fail_next_inserts(&self, n: usize) {
        self.inner.write().unwrap().faults.inserts = n;
    }

    /// The `nth` upcoming `insert_batch` call (1-based) writes its rows but
    /// reports [`StoreError::Unavailable`], like a timeout after the database
    /// committed. The `failing_reads` queries after it fail as well.
    pub fn lose_ack_of_insert(&self, nth: usize, failing_reads: usize) {
        let mut inner = self.inner.write().unwrap();
        inner.faults.lost_ack = nth;
        inner.faults.reads_after_lost_ack = failing_reads;
    }

    /// The next `n` `update_status`/`delete` calls fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.write().unwrap().faults.writes = n;
    }

    /// Simulates another buyer committing `rows` in the window between our
    /// precheck and our next insert.
    pub fn race_before_next_insert(&self, rows: impl IntoIterator<Item = Ticket>) {
        self.inner.write().unwrap().racing_rows.extend(rows);
    }

    fn take_fault(counter: &mut usize, operation: &str) -> Result<(), StoreError> {
        if *counter > 0 {
            *counter -= 1;
            tracing::debug!(operation, "Injected store failure");
            return Err(StoreError::Unavailable(format!(
                "injected failure during {operation}"
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore for InMemoryTicketStore {
    fn query(
        &self,
        filter: TicketFilter,
        order: SortOrder,
        page: Page,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, StoreError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.write().unwrap();
            inner.calls.queries += 1;
            Self::take_fault(&mut inner.faults.queries, "query")?;

            let limit = page.limit.min(inner.page_cap);
            let matched = inner.rows.values().filter(|t| filter.matches(t));
            let rows = match order {
                SortOrder::NumberAscending => {
                    matched.skip(page.offset).take(limit).cloned().collect()
                }
                SortOrder::NewestFirst => {
                    let mut newest: Vec<&Ticket> = matched.collect();
                    newest.sort_by(|a, b| {
                        b.created_at
                            .cmp(&a.created_at)
                            .then_with(|| a.number.cmp(&b.number))
                    });
                    newest.into_iter().skip(page.offset).take(limit).cloned().collect()
                }
            };
            Ok(rows)
        })
    }

    fn count(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.write().unwrap();
            inner.calls.counts += 1;
            Self::take_fault(&mut inner.faults.counts, "count")?;

            let count = inner.rows.values().filter(|t| filter.matches(t)).count();
            Ok(count as u64)
        })
    }

    fn insert_batch(&self, rows: Vec<Ticket>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.write().unwrap();
            inner.calls.inserts += 1;
            Self::take_fault(&mut inner.faults.inserts, "insert_batch")?;
            let lose_ack = match inner.faults.lost_ack {
                0 => false,
                1 => {
                    inner.faults.lost_ack = 0;
                    true
                }
                _ => {
                    inner.faults.lost_ack -= 1;
                    false
                }
            };

            for racer in std::mem::take(&mut inner.racing_rows) {
                inner.rows.entry(racer.number).or_insert(racer);
            }

            if rows.len() > inner.insert_cap {
                return Err(StoreError::Unavailable(format!(
                    "batch of {} rows exceeds the {}-row request limit",
                    rows.len(),
                    inner.insert_cap
                )));
            }

            let mut seen = std::collections::HashSet::new();
            let violated = rows
                .iter()
                .any(|row| inner.rows.contains_key(&row.number) || !seen.insert(row.number));
            if violated {
                return Err(StoreError::UniqueViolation {
                    numbers: rows.iter().map(|row| row.number).collect(),
                });
            }

            for row in rows {
                inner.rows.insert(row.number, row);
            }
            if lose_ack {
                inner.faults.queries += std::mem::take(&mut inner.faults.reads_after_lost_ack);
                tracing::debug!("Dropped insert_batch acknowledgement");
                return Err(StoreError::Unavailable(
                    "connection lost after insert_batch".to_string(),
                ));
            }
            Ok(())
        })
    }

    fn update_status(
        &self,
        filter: TicketFilter,
        status: TicketStatus,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.write().unwrap();
            inner.calls.updates += 1;
            Self::take_fault(&mut inner.faults.writes, "update_status")?;

            let mut affected = 0;
            for row in inner.rows.values_mut().filter(|t| filter.matches(t)) {
                row.status = status;
                affected += 1;
            }
            Ok(affected)
        })
    }

    fn delete(&self, filter: TicketFilter) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.write().unwrap();
            inner.calls.deletes += 1;
            Self::take_fault(&mut inner.faults.writes, "delete")?;

            let before = inner.rows.len();
            inner.rows.retain(|_, t| !filter.matches(t));
            Ok((before - inner.rows.len()) as u64)
        })
    }

    fn max_page_size(&self) -> usize {
        self.inner.read().unwrap().page_cap
    }

    fn max_insert_rows(&self) -> usize {
        self.inner.read().unwrap().insert_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{buyer, epoch, number, paid_row, reserved_row};

    #[tokio::test]
    async fn insert_rejects_whole_batch_on_duplicate() {
        let store = InMemoryTicketStore::new();
        let owner = buyer(1);
        store.seed([paid_row(5, &owner, epoch())]);

        let result = store
            .insert_batch(vec![
                reserved_row(4, &owner, epoch()),
                reserved_row(5, &owner, epoch()),
            ])
            .await;

        assert_eq!(
            result,
            Err(StoreError::UniqueViolation {
                numbers: vec![number(4), number(5)]
            })
        );
        assert!(store.get(number(4)).is_none());
    }

    #[tokio::test]
    async fn query_respects_page_cap() {
        let store = InMemoryTicketStore::with_limits(3, 10);
        let owner = buyer(1);
        store.seed((0..10).map(|v| paid_row(v, &owner, epoch())));

        let rows = store
            .query(TicketFilter::all(), SortOrder::NumberAscending, Page::first(100))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);

        let all = raffle_core::fetch_all(&store, TicketFilter::all(), 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryTicketStore::new();
        store.fail_next_queries(1);

        let first = store
            .query(TicketFilter::all(), SortOrder::NumberAscending, Page::first(1))
            .await;
        assert!(matches!(first, Err(StoreError::Unavailable(_))));

        let second = store
            .query(TicketFilter::all(), SortOrder::NumberAscending, Page::first(1))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn racing_rows_land_before_insert() {
        let store = InMemoryTicketStore::new();
        store.race_before_next_insert([reserved_row(9, &buyer(2), epoch())]);

        let result = store
            .insert_batch(vec![reserved_row(9, &buyer(1), epoch())])
            .await;

        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(store.get(number(9)).unwrap().owner, buyer(2));
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_number_have_one_winner() {
        let store = InMemoryTicketStore::new();
        let attempts = (0..4u32).map(|id| {
            let store = store.clone();
            async move {
                store
                    .insert_batch(vec![reserved_row(11, &buyer(id), epoch())])
                    .await
            }
        });

        let results = futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lost_acknowledgement_still_writes() {
        let store = InMemoryTicketStore::new();
        store.lose_ack_of_insert(2, 1);

        let first = store
            .insert_batch(vec![reserved_row(1, &buyer(1), epoch())])
            .await;
        let second = store
            .insert_batch(vec![reserved_row(2, &buyer(1), epoch())])
            .await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(StoreError::Unavailable(_))));
        assert_eq!(store.get(number(2)).unwrap().owner, buyer(1));

        let read = store
            .query(TicketFilter::all(), SortOrder::NumberAscending, Page::first(10))
            .await;
        assert!(read.is_err());
        assert_eq!(store.len(), 2);
    }
}
