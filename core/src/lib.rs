//! # Raffle Core
//!
//! Domain types and the storage abstraction for the raffle reservation engine.
//!
//! Tickets are drawn from a fixed keyspace of 100,000 numbers (`00000`–`99999`).
//! A ticket row existing in the store means the number is no longer free; absence
//! means free. Reservations expire softly: a `reserved` row older than the
//! reservation TTL is treated by every read path as if it did not exist, but it
//! is never deleted by a background process.
//!
//! ## Core Concepts
//!
//! - **`TicketNumber`**: a validated number inside the keyspace, rendered zero-padded
//! - **`Ticket`**: a persisted row (number, status, owner, creation time)
//! - **`AvailabilitySet`**: a client-held, possibly stale snapshot of unavailable numbers
//! - **`SelectionBatch`**: a buyer's pending, uncommitted candidate numbers
//! - **`TicketStore`**: the remote persistence layer, with a uniqueness constraint
//!   on the ticket number as the last line of defense against double-booking
//! - **`Clock`**: injected time source so TTL behavior is testable
//!
//! ## Example
//!
//! ```
//! use raffle_core::TicketNumber;
//!
//! let number = TicketNumber::parse("7").unwrap();
//! assert_eq!(number.to_string(), "00007");
//! ```

#![forbid(unsafe_code)]

pub mod availability;
pub mod selection;
pub mod store;
pub mod ticket;

pub use availability::AvailabilitySet;
pub use selection::{SelectionBatch, SelectionMode};
pub use store::{
    fetch_all, BoxFuture, Liveness, Page, SortOrder, StoreError, TicketFilter, TicketStore,
};
pub use ticket::{
    Buyer, DomainError, Phone, Ticket, TicketNumber, TicketStatus, KEYSPACE_SIZE, NUMBER_WIDTH,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment traits injected into the engine.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Reservation expiry is computed at read time from `now()`, so tests swap in
    /// a fixed or manually advanced clock to check the TTL boundary exactly.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

}
