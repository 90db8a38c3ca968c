//! Engine metrics.
//!
//! Emitted through the `metrics` facade; the hosting process decides whether a
//! recorder (e.g. the Prometheus exporter) is installed. Without one, every
//! call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Commit attempts, labelled by `outcome`.
pub const COMMITS_TOTAL: &str = "raffle_commits_total";
/// Tickets durably reserved.
pub const TICKETS_RESERVED_TOTAL: &str = "raffle_tickets_reserved_total";
/// Numbers lost to another buyer at precheck or insert time.
pub const COMMIT_CONFLICTS_TOTAL: &str = "raffle_commit_conflicts_total";
/// Draw-and-verify rounds used per lucky draw.
pub const LUCKY_ROUNDS: &str = "raffle_lucky_rounds";
/// Unavailable numbers seen by the last availability refresh.
pub const AVAILABILITY_REFRESH_ROWS: &str = "raffle_availability_refresh_rows";

/// Commit outcome label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every ticket confirmed or already owned.
    Confirmed,
    /// Some tickets failed.
    Partial,
    /// Precheck found taken numbers; nothing written.
    NeedsRepair,
    /// Refused by the anti-hoarding guard.
    DebtCeiling,
    /// Store failed before anything was confirmed.
    Unavailable,
}

impl CommitOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Partial => "partial",
            Self::NeedsRepair => "needs_repair",
            Self::DebtCeiling => "debt_ceiling",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(COMMITS_TOTAL, "Reservation commit attempts by outcome");
    describe_counter!(TICKETS_RESERVED_TOTAL, "Tickets durably reserved");
    describe_counter!(
        COMMIT_CONFLICTS_TOTAL,
        "Selected numbers lost to a concurrent buyer"
    );
    describe_histogram!(LUCKY_ROUNDS, "Draw-and-verify rounds per lucky draw");
    describe_gauge!(
        AVAILABILITY_REFRESH_ROWS,
        "Unavailable numbers in the latest availability snapshot"
    );
}

pub(crate) fn record_commit(outcome: CommitOutcome, reserved: usize) {
    counter!(COMMITS_TOTAL, "outcome" => outcome.label()).increment(1);
    if reserved > 0 {
        counter!(TICKETS_RESERVED_TOTAL).increment(reserved as u64);
    }
}

pub(crate) fn record_conflicts(lost: usize) {
    if lost > 0 {
        counter!(COMMIT_CONFLICTS_TOTAL).increment(lost as u64);
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn record_lucky_rounds(rounds: usize) {
    histogram!(LUCKY_ROUNDS).record(rounds as f64);
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn record_refresh(unavailable: usize) {
    gauge!(AVAILABILITY_REFRESH_ROWS).set(unavailable as f64);
}
