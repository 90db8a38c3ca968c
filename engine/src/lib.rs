//! # Raffle Engine
//!
//! Ticket allocation and reservation for a 100,000-number raffle sold to many
//! concurrent buyers over a store with no client-visible transactions.
//!
//! ## Components
//!
//! - **`AvailabilityIndex`**: pages the live rows out of the store into an
//!   `AvailabilitySet` snapshot, applying the reservation TTL at read time
//! - **`RandomAllocator`**: lucky mode; random distinct free numbers, rechecked
//!   against the store each round
//! - **`ManualSelector`**: manual mode; toggle from the grid or type a number
//! - **`ReservationCommitProtocol`**: precheck, reclaim, chunked insert and
//!   conflict reconciliation; the only path that writes reservations
//! - **`RaffleEngine`**: the facade a UI talks to, one `BuyerSession` per buyer
//! - **`BackOffice`**: payment confirmation, release and cleanup
//!
//! Correctness across buyers rests on the store's uniqueness constraint on the
//! ticket number. The engine checks, writes and reports conflicts after the
//! fact; it never locks.
//!
//! ## Example
//!
//! ```
//! use raffle_engine::{BuyerSession, EngineConfig, RaffleEngine};
//! use raffle_testing::{fixtures, mocks::test_clock, InMemoryTicketStore};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = RaffleEngine::new(
//!     Arc::new(InMemoryTicketStore::new()),
//!     Arc::new(test_clock()),
//!     EngineConfig::default(),
//! );
//! let mut session = BuyerSession::new(fixtures::buyer(1));
//!
//! engine.start_manual(&mut session, 1).await.unwrap();
//! engine.add_by_number(&mut session, "7").await.unwrap();
//! assert!(engine.selection_is_full(&session));
//!
//! let report = engine.commit(&mut session).await.unwrap();
//! assert_eq!(report.confirmed[0].to_string(), "00007");
//! # });
//! ```

#![forbid(unsafe_code)]

pub mod admin;
pub mod allocator;
pub mod availability;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod selector;
pub mod session;

pub use admin::{BackOffice, TicketStats};
pub use allocator::RandomAllocator;
pub use availability::AvailabilityIndex;
pub use commit::{CommitReport, ReservationCommitProtocol};
pub use config::{EngineConfig, LuckyConfig, RetryConfig};
pub use engine::{OwnedTicket, RaffleEngine, SalesProgress};
pub use error::{EngineError, Result};
pub use selector::{ManualSelector, Toggle};
pub use session::BuyerSession;
