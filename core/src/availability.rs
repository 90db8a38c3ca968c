//! Snapshot of unavailable ticket numbers.

use crate::ticket::{TicketNumber, KEYSPACE_SIZE};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Point-in-time set of numbers that are sold or reserved within the TTL.
///
/// This is a cache with no authority. It is correct as of `as_of` and goes stale
/// as other buyers act; every write path revalidates against the store.
#[derive(Clone, Debug)]
pub struct AvailabilitySet {
    unavailable: HashSet<TicketNumber>,
    as_of: DateTime<Utc>,
}

impl AvailabilitySet {
    /// An empty snapshot (nothing known to be taken) taken at `as_of`.
    #[must_use]
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            unavailable: HashSet::new(),
            as_of,
        }
    }

    /// Builds a snapshot from the numbers read out of the store.
    #[must_use]
    pub fn from_numbers(
        numbers: impl IntoIterator<Item = TicketNumber>,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            unavailable: numbers.into_iter().collect(),
            as_of,
        }
    }

    /// When the snapshot was read.
    #[must_use]
    pub const fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    /// Whether `number` was unavailable when the snapshot was taken (or has
    /// since been learned to be).
    #[must_use]
    pub fn contains(&self, number: TicketNumber) -> bool {
        self.unavailable.contains(&number)
    }

    /// Records a number learned to be taken after the snapshot was read.
    ///
    /// Returns `true` if the number was not already known.
    pub fn insert(&mut self, number: TicketNumber) -> bool {
        self.unavailable.insert(number)
    }

    /// Number of unavailable tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.unavailable.len()
    }

    /// Whether nothing is known to be taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unavailable.is_empty()
    }

    /// Free slots remaining according to this snapshot.
    #[must_use]
    pub fn free_count(&self) -> usize {
        (KEYSPACE_SIZE as usize).saturating_sub(self.unavailable.len())
    }

    /// Iterates the unavailable numbers in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = TicketNumber> + '_ {
        self.unavailable.iter().copied()
    }
}

impl Extend<TicketNumber> for AvailabilitySet {
    fn extend<T: IntoIterator<Item = TicketNumber>>(&mut self, iter: T) {
        self.unavailable.extend(iter);
    }
}
