//! Reservation commit protocol.
//!
//! The one place where a selection becomes persisted `reserved` rows. The
//! store offers no multi-row transactions, so the protocol is optimistic:
//!
//! 1. **Guard**: refuse buyers already holding too many unpaid reservations.
//! 2. **Precheck**: read the live rows for the batch. Rows owned by this buyer
//!    count as already satisfied; rows owned by anyone else are removed from
//!    the selection and the commit halts with [`EngineError::NeedsRepair`].
//! 3. **Reclaim**: delete expired `reserved` rows for exactly the numbers about
//!    to be written, so soft-expired numbers can be inserted again.
//! 4. **Write**: insert chunks sequentially. A chunk rejected by the uniqueness
//!    constraint is recorded as failed and the next chunk is attempted.
//! 5. **Read back**: if the store fails during an insert, that chunk may or
//!    may not have landed. Its live rows are read back and the buyer's own
//!    rows count as confirmed. If the read fails too, the chunk stays in the
//!    selection so the next precheck settles it.
//! 6. **Outcome**: every number of the batch ends up confirmed, already owned
//!    or failed; a shortfall is always reported.

use crate::availability::AvailabilityIndex;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::{self, CommitOutcome};
use crate::retry::{retry_if, retry_store_read};
use crate::session::BuyerSession;
use raffle_core::{
    DateTime, SelectionBatch, StoreError, Ticket, TicketFilter, TicketNumber, TicketStatus,
    TicketStore, Utc,
};
use serde::{Deserialize, Serialize};

/// Result of a commit attempt that wrote anything, or tried to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Size of the batch submitted.
    pub requested: usize,
    /// Numbers inserted by this commit.
    pub confirmed: Vec<TicketNumber>,
    /// Numbers this buyer already held live before the commit.
    pub already_owned: Vec<TicketNumber>,
    /// Numbers not reserved: their chunk hit the uniqueness constraint or
    /// the store failed before they were written.
    pub failed: Vec<TicketNumber>,
    /// Failed numbers lost to another buyer: rejected with a chunk that hit
    /// the uniqueness constraint, or found held by someone else on read-back.
    pub conflicts: Vec<TicketNumber>,
    /// Failed numbers whose insert outcome is unknown. They are carried in
    /// the session's selection until a later commit settles them.
    pub in_doubt: Vec<TicketNumber>,
    /// Expired reservations deleted to make room.
    pub reclaimed: u64,
}

impl CommitReport {
    /// Numbers the buyer now holds from this batch.
    #[must_use]
    pub fn satisfied(&self) -> usize {
        self.confirmed.len() + self.already_owned.len()
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Commits a session's selection.
#[derive(Clone, Copy)]
pub struct ReservationCommitProtocol<'a> {
    store: &'a dyn TicketStore,
    config: &'a EngineConfig,
}

impl<'a> ReservationCommitProtocol<'a> {
    /// Protocol writing to `store`.
    #[must_use]
    pub const fn new(store: &'a dyn TicketStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Commits the session's full selection as `reserved` rows at `now`.
    ///
    /// On success the selection is cleared. On a partial commit the selection
    /// is replaced by an empty batch of the same mode targeting the shortfall,
    /// ready to be topped up. Confirmed and already-owned numbers are recorded
    /// on the session in both cases.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoSelection`] / [`EngineError::SelectionIncomplete`]
    ///   when there is nothing full to commit.
    /// - [`EngineError::DebtCeilingExceeded`] from the anti-hoarding guard.
    /// - [`EngineError::NeedsRepair`] when the precheck finds numbers taken by
    ///   someone else. Nothing is written.
    /// - [`EngineError::PartialCommit`] when some numbers failed. Numbers in
    ///   [`CommitReport::in_doubt`] stay in the new selection.
    /// - [`EngineError::StoreUnavailable`] when the store failed before any
    ///   number was secured or lost to another buyer. The selection is kept.
    #[tracing::instrument(
        skip(self, session),
        fields(
            phone = %session.buyer.phone,
            batch = session.selection.as_ref().map_or(0, SelectionBatch::len)
        )
    )]
    pub async fn commit(
        &self,
        session: &mut BuyerSession,
        now: DateTime<Utc>,
    ) -> Result<CommitReport> {
        let (mode, batch) = {
            let selection = session.selection.as_ref().ok_or(EngineError::NoSelection)?;
            if selection.is_empty() || !selection.is_full() {
                return Err(EngineError::SelectionIncomplete {
                    selected: selection.len(),
                    target: selection.target(),
                });
            }
            (selection.mode(), selection.numbers().to_vec())
        };
        let cutoff = self.config.expiry_cutoff(now);

        if let Err(err) = self.check_debt_ceiling(session, cutoff).await {
            if matches!(err, EngineError::DebtCeilingExceeded { .. }) {
                metrics::record_commit(CommitOutcome::DebtCeiling, 0);
            }
            return Err(err);
        }

        let live = AvailabilityIndex::new(self.store, self.config)
            .live_rows(&batch, now)
            .await?;
        let (owned, taken): (Vec<Ticket>, Vec<Ticket>) = live
            .into_iter()
            .partition(|row| row.owner.same_identity(&session.buyer));
        if !taken.is_empty() {
            let taken: Vec<TicketNumber> = taken.into_iter().map(|t| t.number).collect();
            if let Some(selection) = session.selection.as_mut() {
                selection.remove_all(&taken);
            }
            if let Some(snapshot) = session.availability.as_mut() {
                snapshot.extend(taken.iter().copied());
            }
            metrics::record_conflicts(taken.len());
            metrics::record_commit(CommitOutcome::NeedsRepair, 0);
            tracing::warn!(taken = taken.len(), "Precheck found taken numbers, commit halted");
            return Err(EngineError::NeedsRepair { taken });
        }

        let already_owned: Vec<TicketNumber> = owned.iter().map(|t| t.number).collect();
        let to_write: Vec<TicketNumber> = batch
            .iter()
            .copied()
            .filter(|n| !already_owned.contains(n))
            .collect();

        let mut report = CommitReport {
            requested: batch.len(),
            confirmed: Vec::with_capacity(to_write.len()),
            already_owned,
            failed: Vec::new(),
            conflicts: Vec::new(),
            in_doubt: Vec::new(),
            reclaimed: 0,
        };
        let outage = match self
            .write_chunks(&to_write, session, cutoff, now, &mut report)
            .await
        {
            Some(interrupted) => {
                self.read_back(&interrupted.chunk, session, now, &mut report)
                    .await;
                Some(interrupted.reason)
            }
            None => None,
        };

        session.record_confirmed(
            report
                .already_owned
                .iter()
                .chain(report.confirmed.iter())
                .copied(),
        );

        if report.is_complete() {
            session.selection = None;
            metrics::record_commit(CommitOutcome::Confirmed, report.confirmed.len());
            tracing::info!(
                confirmed = report.confirmed.len(),
                already_owned = report.already_owned.len(),
                reclaimed = report.reclaimed,
                "Reservation committed"
            );
            return Ok(report);
        }

        // Nothing secured and nothing lost: keep the selection for a retry.
        if let Some(reason) =
            outage.filter(|_| report.satisfied() == 0 && report.conflicts.is_empty())
        {
            metrics::record_commit(CommitOutcome::Unavailable, 0);
            return Err(EngineError::StoreUnavailable(reason));
        }

        let mut shortfall = SelectionBatch::new(mode, report.failed.len());
        for number in &report.in_doubt {
            shortfall.insert(*number);
        }
        session.selection = Some(shortfall);
        metrics::record_commit(CommitOutcome::Partial, report.confirmed.len());
        tracing::warn!(
            confirmed = report.confirmed.len(),
            already_owned = report.already_owned.len(),
            failed = report.failed.len(),
            in_doubt = report.in_doubt.len(),
            "Partial commit"
        );
        Err(EngineError::PartialCommit(Box::new(report)))
    }

    async fn check_debt_ceiling(
        &self,
        session: &BuyerSession,
        cutoff: DateTime<Utc>,
    ) -> Result<()> {
        let Some(ceiling) = self.config.debt_ceiling else {
            return Ok(());
        };
        let filter = TicketFilter::all()
            .status(TicketStatus::Reserved)
            .phone(session.buyer.phone.clone())
            .live_since(cutoff);
        let outstanding = retry_store_read(self.config.retry_policy(), "count_outstanding", || {
            self.store.count(filter.clone())
        })
        .await?;

        if outstanding >= ceiling {
            tracing::warn!(outstanding, ceiling, "Anti-hoarding ceiling reached");
            return Err(EngineError::DebtCeilingExceeded {
                outstanding,
                ceiling,
            });
        }
        Ok(())
    }

    /// Reclaims and inserts `numbers` chunk by chunk, filling `report`.
    ///
    /// Stops at the first store failure: that chunk and every later one are
    /// marked failed, and the interrupted chunk is returned for read-back.
    async fn write_chunks(
        &self,
        numbers: &[TicketNumber],
        session: &BuyerSession,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut CommitReport,
    ) -> Option<Interrupted> {
        let chunk_size = self
            .config
            .insert_chunk_size
            .min(self.store.max_insert_rows())
            .max(1);

        for (index, chunk) in numbers.chunks(chunk_size).enumerate() {
            match self.reclaim(chunk, cutoff).await {
                Ok(reclaimed) => report.reclaimed += reclaimed,
                Err(err) => {
                    // Nothing of this chunk was sent, so nothing is in doubt.
                    report.failed.extend_from_slice(&numbers[index * chunk_size..]);
                    tracing::error!(chunk = index, error = %err, "Store failed mid-commit");
                    return Some(Interrupted {
                        reason: err.to_string(),
                        chunk: Vec::new(),
                    });
                }
            }

            let rows = chunk
                .iter()
                .map(|n| Ticket::reserved(*n, session.buyer.clone(), now))
                .collect();
            match self.store.insert_batch(rows).await {
                Ok(()) => report.confirmed.extend_from_slice(chunk),
                Err(StoreError::UniqueViolation { .. }) => {
                    report.failed.extend_from_slice(chunk);
                    report.conflicts.extend_from_slice(chunk);
                    metrics::record_conflicts(chunk.len());
                    tracing::warn!(chunk = index, size = chunk.len(), "Chunk lost a race");
                }
                Err(err) => {
                    report.failed.extend_from_slice(&numbers[index * chunk_size..]);
                    tracing::error!(chunk = index, error = %err, "Store failed mid-insert");
                    return Some(Interrupted {
                        reason: err.to_string(),
                        chunk: chunk.to_vec(),
                    });
                }
            }
        }
        None
    }

    /// Settles a chunk whose insert failed with an unknown outcome.
    ///
    /// The buyer's own live rows landed and move from `failed` to
    /// `confirmed`; rows held by anyone else become conflicts. If the read
    /// fails as well, the whole chunk is left in doubt.
    async fn read_back(
        &self,
        chunk: &[TicketNumber],
        session: &mut BuyerSession,
        now: DateTime<Utc>,
        report: &mut CommitReport,
    ) {
        if chunk.is_empty() {
            return;
        }
        let rows = match AvailabilityIndex::new(self.store, self.config)
            .live_rows(chunk, now)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(size = chunk.len(), error = %err, "Interrupted chunk left in doubt");
                report.in_doubt.extend_from_slice(chunk);
                return;
            }
        };

        let (own, others): (Vec<Ticket>, Vec<Ticket>) = rows
            .into_iter()
            .partition(|row| row.owner.same_identity(&session.buyer));
        let landed: Vec<TicketNumber> = chunk
            .iter()
            .copied()
            .filter(|n| own.iter().any(|row| row.number == *n))
            .collect();
        let taken: Vec<TicketNumber> = others.iter().map(|row| row.number).collect();

        report.failed.retain(|n| !landed.contains(n));
        report.confirmed.extend_from_slice(&landed);
        report.conflicts.extend_from_slice(&taken);
        if let Some(snapshot) = session.availability.as_mut() {
            snapshot.extend(taken.iter().copied());
        }
        metrics::record_conflicts(taken.len());
        tracing::info!(
            landed = landed.len(),
            taken = taken.len(),
            "Read back interrupted chunk"
        );
    }

    async fn reclaim(
        &self,
        chunk: &[TicketNumber],
        cutoff: DateTime<Utc>,
    ) -> std::result::Result<u64, StoreError> {
        let filter = TicketFilter::all()
            .numbers(chunk.to_vec())
            .expired_before(cutoff);
        let reclaimed = retry_if(
            self.config.retry_policy(),
            "reclaim_expired",
            || self.store.delete(filter.clone()),
            |err| matches!(err, StoreError::Unavailable(_)),
        )
        .await?;
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "Reclaimed expired reservations");
        }
        Ok(reclaimed)
    }
}

/// Where a commit stopped because the store failed.
struct Interrupted {
    reason: String,
    /// Numbers sent in the failed insert; empty if the failure came first.
    chunk: Vec<TicketNumber>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use chrono::Duration;
    use raffle_core::{AvailabilitySet, SelectionMode};
    use raffle_testing::fixtures::{buyer, epoch, number, numbers, paid_row, reserved_row};
    use raffle_testing::InMemoryTicketStore;

    fn session_with(values: &[u32]) -> BuyerSession {
        let mut session = BuyerSession::with_seed(buyer(1), 1);
        let mut batch = SelectionBatch::new(SelectionMode::Manual, values.len());
        for n in numbers(values) {
            batch.insert(n);
        }
        session.selection = Some(batch);
        session.availability = Some(AvailabilitySet::empty(epoch()));
        session
    }

    #[tokio::test]
    async fn commits_full_selection() {
        let store = InMemoryTicketStore::new();
        let config = EngineConfig::default();
        let mut session = session_with(&[1, 2, 3]);

        let report = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap();

        assert_eq!(report.confirmed, numbers(&[1, 2, 3]));
        assert!(session.selection().is_none());
        assert_eq!(session.confirmed(), numbers(&[1, 2, 3]).as_slice());
        assert_eq!(store.get(number(2)).unwrap().status, TicketStatus::Reserved);
    }

    #[tokio::test]
    async fn incomplete_selection_is_refused() {
        let store = InMemoryTicketStore::new();
        let config = EngineConfig::default();
        let mut session = BuyerSession::with_seed(buyer(1), 1);
        session.selection = Some(SelectionBatch::new(SelectionMode::Manual, 2));

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::SelectionIncomplete {
                selected: 0,
                target: 2
            }
        );
        assert_eq!(store.calls().counts, 0);
    }

    #[tokio::test]
    async fn precheck_repairs_selection() {
        let store = InMemoryTicketStore::new();
        store.seed([paid_row(2, &buyer(2), epoch())]);
        let config = EngineConfig::default();
        let mut session = session_with(&[1, 2, 3]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::NeedsRepair { taken: numbers(&[2]) });
        assert_eq!(session.selection().unwrap().numbers(), numbers(&[1, 3]).as_slice());
        assert!(session.availability().unwrap().contains(number(2)));
        assert_eq!(store.calls().inserts, 0);
    }

    #[tokio::test]
    async fn own_reservations_count_as_satisfied() {
        let store = InMemoryTicketStore::new();
        store.seed([reserved_row(2, &buyer(1), epoch())]);
        let config = EngineConfig::default();
        let mut session = session_with(&[1, 2]);

        let report = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap();

        assert_eq!(report.confirmed, numbers(&[1]));
        assert_eq!(report.already_owned, numbers(&[2]));
    }

    #[tokio::test]
    async fn expired_rows_are_reclaimed_before_insert() {
        let store = InMemoryTicketStore::new();
        let now = epoch();
        store.seed([reserved_row(4, &buyer(2), now - Duration::hours(6))]);
        let config = EngineConfig::default();
        let mut session = session_with(&[4]);

        let report = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, now)
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 1);
        assert_eq!(store.get(number(4)).unwrap().owner, buyer(1));
    }

    #[tokio::test]
    async fn losing_chunk_fails_alone() {
        let store = InMemoryTicketStore::with_limits(1000, 2);
        store.race_before_next_insert([reserved_row(2, &buyer(2), epoch())]);
        let config = EngineConfig::default();
        let mut session = session_with(&[1, 2, 3, 4]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        let EngineError::PartialCommit(report) = err else {
            panic!("expected partial commit, got {err:?}");
        };
        assert_eq!(report.confirmed, numbers(&[3, 4]));
        assert_eq!(report.failed, numbers(&[1, 2]));
        assert_eq!(report.requested, 4);

        let retry = session.selection().unwrap();
        assert_eq!(retry.target(), 2);
        assert!(retry.is_empty());
        assert_eq!(session.confirmed(), numbers(&[3, 4]).as_slice());
    }

    #[tokio::test]
    async fn outage_before_any_insert_is_unavailable() {
        let store = InMemoryTicketStore::new();
        store.fail_next_inserts(1);
        let config = EngineConfig::default();
        let mut session = session_with(&[1, 2]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(session.selection().unwrap().is_full());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn debt_ceiling_blocks_before_writing() {
        let store = InMemoryTicketStore::new();
        let owner = buyer(1);
        store.seed((100..103).map(|v| reserved_row(v, &owner, epoch())));
        let config = EngineConfig {
            debt_ceiling: Some(3),
            ..EngineConfig::default()
        };
        let mut session = session_with(&[1]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::DebtCeilingExceeded {
                outstanding: 3,
                ceiling: 3
            }
        );
        assert_eq!(store.calls().queries, 0);
        assert_eq!(store.calls().inserts, 0);
    }

    fn quick_retries() -> EngineConfig {
        EngineConfig {
            retry: crate::config::RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn interrupted_insert_that_landed_is_confirmed() {
        let store = InMemoryTicketStore::with_limits(1000, 2);
        store.lose_ack_of_insert(2, 0);
        let config = quick_retries();
        let mut session = session_with(&[1, 2, 3, 4, 5, 6]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        let EngineError::PartialCommit(report) = err else {
            panic!("expected partial commit, got {err:?}");
        };
        assert_eq!(report.confirmed, numbers(&[1, 2, 3, 4]));
        assert_eq!(report.failed, numbers(&[5, 6]));
        assert!(report.in_doubt.is_empty());
        assert!(report.conflicts.is_empty());
        assert_eq!(session.confirmed(), numbers(&[1, 2, 3, 4]).as_slice());
        assert_eq!(store.len(), 4);
        assert_eq!(session.selection().unwrap().remaining(), 2);
    }

    #[tokio::test]
    async fn unreadable_interrupted_insert_is_settled_by_next_commit() {
        let store = InMemoryTicketStore::with_limits(1000, 2);
        store.lose_ack_of_insert(2, 3);
        let config = quick_retries();
        let protocol = ReservationCommitProtocol::new(&store, &config);
        let mut session = session_with(&[1, 2, 3, 4]);

        let err = protocol.commit(&mut session, epoch()).await.unwrap_err();

        let EngineError::PartialCommit(report) = err else {
            panic!("expected partial commit, got {err:?}");
        };
        assert_eq!(report.confirmed, numbers(&[1, 2]));
        assert_eq!(report.in_doubt, numbers(&[3, 4]));
        let carried = session.selection().unwrap();
        assert_eq!(carried.numbers(), numbers(&[3, 4]).as_slice());
        assert!(carried.is_full());

        let settled = protocol.commit(&mut session, epoch()).await.unwrap();

        assert!(settled.confirmed.is_empty());
        assert_eq!(settled.already_owned, numbers(&[3, 4]));
        assert_eq!(session.confirmed(), numbers(&[1, 2, 3, 4]).as_slice());
        assert_eq!(store.len(), 4);
        assert_eq!(store.calls().inserts, 2);
    }

    #[tokio::test]
    async fn conflicts_survive_a_later_outage() {
        let store = InMemoryTicketStore::with_limits(1000, 2);
        store.race_before_next_insert([reserved_row(2, &buyer(2), epoch())]);
        store.lose_ack_of_insert(2, 3);
        let config = quick_retries();
        let mut session = session_with(&[1, 2, 3, 4]);

        let err = ReservationCommitProtocol::new(&store, &config)
            .commit(&mut session, epoch())
            .await
            .unwrap_err();

        let EngineError::PartialCommit(report) = err else {
            panic!("expected partial commit, got {err:?}");
        };
        assert!(report.confirmed.is_empty());
        assert_eq!(report.conflicts, numbers(&[1, 2]));
        assert_eq!(report.in_doubt, numbers(&[3, 4]));
        assert_eq!(report.failed, numbers(&[1, 2, 3, 4]));
    }
}
