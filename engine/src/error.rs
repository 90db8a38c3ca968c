//! Engine error taxonomy.

use crate::commit::CommitReport;
use raffle_core::{DomainError, StoreError, TicketNumber};
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by engine operations.
///
/// `AlreadyTaken`, `NeedsRepair` and `PartialCommit` are expected outcomes under
/// contention: the caller recovers by offering the buyer a corrected view.
/// `StoreUnavailable` is the only retryable variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A store read or write could not complete. Never means "ticket is free".
    #[error("ticket store unavailable: {0}")]
    StoreUnavailable(String),

    /// The number is sold or reserved within the TTL.
    #[error("ticket {0} is already taken")]
    AlreadyTaken(TicketNumber),

    /// The number is already in the buyer's selection.
    #[error("ticket {0} is already selected")]
    AlreadySelected(TicketNumber),

    /// The selection already holds its target quantity.
    #[error("selection is already at its target of {target} tickets")]
    CapacityReached {
        /// Target quantity of the batch.
        target: usize,
    },

    /// Fewer tickets were durably reserved than attempted. The confirmed
    /// tickets in the report are reserved; the failed ones are not.
    #[error(
        "only {} of {} tickets were reserved",
        .0.confirmed.len(),
        .0.requested
    )]
    PartialCommit(Box<CommitReport>),

    /// Not enough free numbers remain to satisfy a lucky draw.
    #[error("only {available} free tickets remain, {requested} requested")]
    KeyspaceExhausted {
        /// Quantity asked for.
        requested: usize,
        /// Free numbers known to remain.
        available: usize,
    },

    /// Requested quantity outside `1..=max`.
    #[error("quantity must be between 1 and {max}, got {requested}")]
    InvalidQuantity {
        /// Quantity asked for.
        requested: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Malformed ticket number or buyer data.
    #[error(transparent)]
    InvalidInput(#[from] DomainError),

    /// Commit precheck found selected numbers taken by someone else. They
    /// were removed from the selection; nothing was written.
    #[error("{} selected ticket(s) were taken by another buyer", taken.len())]
    NeedsRepair {
        /// Numbers that lost the race.
        taken: Vec<TicketNumber>,
    },

    /// The buyer holds too many unpaid reservations to commit more.
    #[error("buyer already holds {outstanding} unpaid reservations (limit {ceiling})")]
    DebtCeilingExceeded {
        /// Live unpaid reservations held.
        outstanding: u64,
        /// Configured ceiling.
        ceiling: u64,
    },

    /// No selection has been started in this session.
    #[error("no selection in progress")]
    NoSelection,

    /// The selection is not yet at its target quantity.
    #[error("selection holds {selected} of {target} tickets")]
    SelectionIncomplete {
        /// Numbers selected so far.
        selected: usize,
        /// Target quantity.
        target: usize,
    },
}

impl EngineError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Uniqueness violations are intercepted by the commit protocol before this
/// conversion; anything reaching it is a failed store interaction.
impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
