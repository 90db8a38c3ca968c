//! # Raffle Testing
//!
//! Testing utilities for the raffle reservation engine.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: a `TicketStore` with a real uniqueness constraint,
//!   page caps, failure injection and concurrent-writer injection
//! - [`mocks::FixedClock`] and [`mocks::ManualClock`] for TTL-sensitive tests
//! - [`fixtures`]: buyers and ticket rows
//! - [`properties`]: `proptest` strategies
//!
//! ## Example
//!
//! ```
//! use raffle_testing::{fixtures, InMemoryTicketStore};
//!
//! let store = InMemoryTicketStore::new();
//! store.seed([fixtures::paid_row(1, &fixtures::buyer(1), fixtures::epoch())]);
//! assert_eq!(store.len(), 1);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

mod memory_store;

pub use memory_store::{CallCounts, InMemoryTicketStore};

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use raffle_core::environment::Clock;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle while the
    /// engine holds another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Starts the clock at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Moves the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jumps to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Default fixed clock for tests, at [`crate::fixtures::epoch`].
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::epoch())
    }
}

/// Buyers, rows and other test data.
pub mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};
    use raffle_core::{Buyer, Phone, Ticket, TicketNumber, TicketStatus};

    /// 2025-01-01 00:00:00 UTC, the reference instant for tests.
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    /// A ticket number from its value.
    #[must_use]
    pub fn number(value: u32) -> TicketNumber {
        TicketNumber::new(value).unwrap()
    }

    /// Ticket numbers from values.
    #[must_use]
    pub fn numbers(values: &[u32]) -> Vec<TicketNumber> {
        values.iter().copied().map(number).collect()
    }

    /// A distinct, valid buyer per `id`.
    #[must_use]
    pub fn buyer(id: u32) -> Buyer {
        let phone = Phone::parse(&format!("55{:08}", id % 100_000_000)).unwrap();
        Buyer::new(format!("Buyer {id}"), phone, "Sonora").unwrap()
    }

    /// A `reserved` row.
    #[must_use]
    pub fn reserved_row(value: u32, owner: &Buyer, created_at: DateTime<Utc>) -> Ticket {
        Ticket::reserved(number(value), owner.clone(), created_at)
    }

    /// A `paid` row.
    #[must_use]
    pub fn paid_row(value: u32, owner: &Buyer, created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            number: number(value),
            status: TicketStatus::Paid,
            owner: owner.clone(),
            created_at,
        }
    }
}

/// Property-based testing utilities
pub mod properties {
    use proptest::prelude::*;
    use raffle_core::{TicketNumber, KEYSPACE_SIZE};

    /// Any ticket number in the keyspace.
    pub fn ticket_number() -> impl Strategy<Value = TicketNumber> {
        (0..KEYSPACE_SIZE).prop_map(|v| TicketNumber::new(v).unwrap())
    }

    /// Ticket numbers drawn from a narrow band, so collisions are likely.
    pub fn crowded_number(band: u32) -> impl Strategy<Value = TicketNumber> {
        (0..band.clamp(1, KEYSPACE_SIZE)).prop_map(|v| TicketNumber::new(v).unwrap())
    }
}

/// Installs a `tracing` subscriber for test output; safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raffle_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
