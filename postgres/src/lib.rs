//! `PostgreSQL` ticket store for the raffle engine.
//!
//! Implements the `TicketStore` trait from `raffle-core` over a single
//! `tickets` table whose primary key is the ticket number. That key is the
//! uniqueness constraint the engine's optimistic commit protocol relies on:
//! a multi-row `INSERT` either lands whole or fails with a unique violation.
//!
//! # Example
//!
//! ```ignore
//! use raffle_postgres::{PostgresConfig, PostgresTicketStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect(&PostgresConfig::from_env()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod store;

pub use config::PostgresConfig;
pub use store::PostgresTicketStore;
