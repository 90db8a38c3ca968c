//! Lucky-mode allocator: random, distinct, currently free numbers.

use crate::availability::AvailabilityIndex;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use raffle_core::{AvailabilitySet, DateTime, TicketNumber, Utc, KEYSPACE_SIZE};
use std::collections::HashSet;

/// Draws candidate numbers for a lucky selection.
///
/// Candidates are never persisted here; the commit protocol reconciles any
/// that are lost to another buyer in the meantime.
#[derive(Clone, Copy)]
pub struct RandomAllocator<'a> {
    index: AvailabilityIndex<'a>,
    config: &'a EngineConfig,
}

impl<'a> RandomAllocator<'a> {
    /// Allocator verifying its draws through `index`.
    #[must_use]
    pub const fn new(index: AvailabilityIndex<'a>, config: &'a EngineConfig) -> Self {
        Self { index, config }
    }

    /// Draws `quantity` distinct numbers absent from `snapshot` and `keep`.
    ///
    /// Each round draws locally against the snapshot, then rechecks every
    /// accumulated candidate against the store and evicts the ones found
    /// taken; evicted numbers are recorded in `snapshot`. When the rounds run
    /// out, the shortfall is sampled from the numbers the snapshot still shows
    /// free, without a further store check.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] when `quantity` is zero or above the
    ///   configured maximum.
    /// - [`EngineError::KeyspaceExhausted`] when fewer than `quantity` free
    ///   numbers remain.
    /// - [`EngineError::StoreUnavailable`] when a recheck fails.
    #[tracing::instrument(skip(self, snapshot, keep, rng), fields(kept = keep.len()))]
    pub async fn draw(
        &self,
        quantity: usize,
        snapshot: &mut AvailabilitySet,
        keep: &[TicketNumber],
        rng: &mut StdRng,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>> {
        if quantity == 0 || quantity > self.config.max_quantity {
            return Err(EngineError::InvalidQuantity {
                requested: quantity,
                max: self.config.max_quantity,
            });
        }

        let kept_free = keep.iter().filter(|n| !snapshot.contains(**n)).count();
        let available = snapshot.free_count().saturating_sub(kept_free);
        if available < quantity {
            return Err(EngineError::KeyspaceExhausted {
                requested: quantity,
                available,
            });
        }

        let mut drawn: HashSet<TicketNumber> = keep.iter().copied().collect();
        let mut candidates: Vec<TicketNumber> = Vec::with_capacity(quantity);
        let mut rounds = 0;

        while candidates.len() < quantity && rounds < self.config.lucky.max_rounds {
            rounds += 1;
            let mut draws = 0;
            let mut added = 0;
            while candidates.len() < quantity && draws < self.config.lucky.draws_per_round {
                draws += 1;
                let Some(number) = TicketNumber::new(rng.gen_range(0..KEYSPACE_SIZE)) else {
                    continue;
                };
                if !snapshot.contains(number) && drawn.insert(number) {
                    candidates.push(number);
                    added += 1;
                }
            }
            if added == 0 {
                continue;
            }

            let taken: HashSet<TicketNumber> = self
                .index
                .live_rows(&candidates, now)
                .await?
                .into_iter()
                .map(|t| t.number)
                .collect();
            if !taken.is_empty() {
                tracing::debug!(round = rounds, evicted = taken.len(), "Evicted taken candidates");
                candidates.retain(|n| !taken.contains(n));
                snapshot.extend(taken);
            }
        }

        if candidates.len() < quantity {
            let shortfall = quantity - candidates.len();
            let pool: Vec<TicketNumber> = TicketNumber::all()
                .filter(|n| !snapshot.contains(*n) && !drawn.contains(n))
                .collect();
            if pool.len() < shortfall {
                return Err(EngineError::KeyspaceExhausted {
                    requested: quantity,
                    available: candidates.len() + pool.len(),
                });
            }
            tracing::warn!(
                rounds,
                shortfall,
                pool = pool.len(),
                "Lucky draw rounds exhausted, sampling from snapshot"
            );
            candidates.extend(pool.choose_multiple(rng, shortfall).copied());
        }

        metrics::record_lucky_rounds(rounds);
        Ok(candidates)
    }
}
