//! Engine configuration.
//!
//! Loads from `RAFFLE_*` environment variables with defaults matching the
//! production raffle: 5-hour reservations, 1000-row read pages, 500-row insert
//! chunks, at most 500 tickets per request and 2000 unpaid tickets per buyer.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::env;

/// Longest accepted TTL (ten years); keeps the `chrono` conversion in range.
const MAX_TTL_SECS: u64 = 315_360_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reservation time-to-live in seconds (soft expiry).
    pub reservation_ttl_secs: u64,
    /// Rows requested per read page; clamped to the store's own cap.
    pub page_size: usize,
    /// Rows per insert request; clamped to the store's own cap.
    pub insert_chunk_size: usize,
    /// Largest quantity a buyer may request at once.
    pub max_quantity: usize,
    /// Unpaid reservations a buyer may hold before new commits are refused
    /// (`None` disables the guard).
    pub debt_ceiling: Option<u64>,
    /// Lucky draw tuning.
    pub lucky: LuckyConfig,
    /// Retry policy for idempotent store reads.
    pub retry: RetryConfig,
}

/// Lucky draw tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuckyConfig {
    /// Draw-and-verify rounds before falling back to the cached snapshot.
    pub max_rounds: usize,
    /// Random draws allowed per round.
    pub draws_per_round: usize,
}

/// Store retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 5 * 60 * 60,
            page_size: 1000,
            insert_chunk_size: 500,
            max_quantity: 500,
            debt_ceiling: Some(2000),
            lucky: LuckyConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for LuckyConfig {
    fn default() -> Self {
        Self {
            max_rounds: 300,
            draws_per_round: 1000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// [`EngineConfig::default`] for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl_secs: parsed("RAFFLE_RESERVATION_TTL_SECS")
                .unwrap_or(defaults.reservation_ttl_secs),
            page_size: parsed("RAFFLE_PAGE_SIZE").unwrap_or(defaults.page_size),
            insert_chunk_size: parsed("RAFFLE_INSERT_CHUNK_SIZE")
                .unwrap_or(defaults.insert_chunk_size),
            max_quantity: parsed("RAFFLE_MAX_QUANTITY").unwrap_or(defaults.max_quantity),
            debt_ceiling: match parsed::<u64>("RAFFLE_DEBT_CEILING") {
                Some(0) => None,
                Some(ceiling) => Some(ceiling),
                None => defaults.debt_ceiling,
            },
            lucky: LuckyConfig {
                max_rounds: parsed("RAFFLE_LUCKY_MAX_ROUNDS").unwrap_or(defaults.lucky.max_rounds),
                draws_per_round: parsed("RAFFLE_LUCKY_DRAWS_PER_ROUND")
                    .unwrap_or(defaults.lucky.draws_per_round),
            },
            retry: RetryConfig {
                max_retries: parsed("RAFFLE_RETRY_MAX").unwrap_or(defaults.retry.max_retries),
                initial_delay_ms: parsed("RAFFLE_RETRY_INITIAL_DELAY_MS")
                    .unwrap_or(defaults.retry.initial_delay_ms),
                max_delay_ms: parsed("RAFFLE_RETRY_MAX_DELAY_MS")
                    .unwrap_or(defaults.retry.max_delay_ms),
            },
        }
    }

    /// The reservation TTL.
    #[must_use]
    pub fn reservation_ttl(&self) -> Duration {
        let secs = self.reservation_ttl_secs.min(MAX_TTL_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    /// `now - ttl`: reservations created before this instant have expired.
    #[must_use]
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.reservation_ttl()
    }

    /// Backoff policy for store reads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry.max_retries)
            .initial_delay(std::time::Duration::from_millis(self.retry.initial_delay_ms))
            .max_delay(std::time::Duration::from_millis(self.retry.max_delay_ms))
            .build()
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
