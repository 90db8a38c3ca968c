//! A buyer's pending selection of ticket numbers.

use crate::ticket::{DomainError, TicketNumber};
use serde::{Deserialize, Serialize};

/// How the numbers in a batch were chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Picked one by one by the buyer.
    Manual,
    /// Drawn at random by the engine.
    Lucky,
}

/// Candidate numbers for one buyer session, bounded by a target quantity.
///
/// Insertion order is preserved (it is the order the buyer sees). The batch can
/// never hold more than `target` numbers or the same number twice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectionFields")]
pub struct SelectionBatch {
    mode: SelectionMode,
    target: usize,
    numbers: Vec<TicketNumber>,
}

impl SelectionBatch {
    /// An empty batch aiming for `target` numbers.
    #[must_use]
    pub const fn new(mode: SelectionMode, target: usize) -> Self {
        Self {
            mode,
            target,
            numbers: Vec::new(),
        }
    }

    /// How the batch is being filled.
    #[must_use]
    pub const fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Target quantity.
    #[must_use]
    pub const fn target(&self) -> usize {
        self.target
    }

    /// Selected numbers in insertion order.
    #[must_use]
    pub fn numbers(&self) -> &[TicketNumber] {
        &self.numbers
    }

    /// Number of selected tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    /// Whether exactly `target` numbers are selected; gates commit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.numbers.len() == self.target
    }

    /// Slots left before the batch is full.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.numbers.len())
    }

    /// Whether `number` is selected.
    #[must_use]
    pub fn contains(&self, number: TicketNumber) -> bool {
        self.numbers.contains(&number)
    }

    /// Adds `number` if there is room and it is not already selected.
    ///
    /// Returns `true` if the batch changed.
    pub fn insert(&mut self, number: TicketNumber) -> bool {
        if self.is_full() || self.contains(number) {
            return false;
        }
        self.numbers.push(number);
        true
    }

    /// Removes `number`, freeing its slot. Returns `true` if it was selected.
    pub fn remove(&mut self, number: TicketNumber) -> bool {
        let before = self.numbers.len();
        self.numbers.retain(|n| *n != number);
        self.numbers.len() != before
    }

    /// Removes every number in `taken`, returning the ones that were selected.
    pub fn remove_all(&mut self, taken: &[TicketNumber]) -> Vec<TicketNumber> {
        let mut removed = Vec::new();
        self.numbers.retain(|n| {
            if taken.contains(n) {
                removed.push(*n);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Empties the batch, keeping mode and target.
    pub fn clear(&mut self) {
        self.numbers.clear();
    }
}

/// Unchecked wire form of [`SelectionBatch`].
#[derive(Deserialize)]
struct SelectionFields {
    mode: SelectionMode,
    target: usize,
    numbers: Vec<TicketNumber>,
}

impl TryFrom<SelectionFields> for SelectionBatch {
    type Error = DomainError;

    fn try_from(fields: SelectionFields) -> Result<Self, Self::Error> {
        if fields.numbers.len() > fields.target {
            return Err(DomainError::OverfullSelection {
                selected: fields.numbers.len(),
                target: fields.target,
            });
        }
        let mut batch = Self::new(fields.mode, fields.target);
        for number in fields.numbers {
            if !batch.insert(number) {
                return Err(DomainError::DuplicateSelection(number));
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn n(value: u32) -> TicketNumber {
        TicketNumber::new(value).unwrap()
    }

    #[test]
    fn insert_stops_at_target() {
        let mut batch = SelectionBatch::new(SelectionMode::Manual, 2);
        assert!(batch.insert(n(1)));
        assert!(!batch.insert(n(1)));
        assert!(batch.insert(n(2)));
        assert!(batch.is_full());
        assert!(!batch.insert(n(3)));
        assert_eq!(batch.numbers(), &[n(1), n(2)]);
    }

    #[test]
    fn remove_all_reports_removed_numbers() {
        let mut batch = SelectionBatch::new(SelectionMode::Lucky, 3);
        batch.insert(n(1));
        batch.insert(n(2));
        batch.insert(n(3));

        let removed = batch.remove_all(&[n(2), n(9)]);
        assert_eq!(removed, vec![n(2)]);
        assert_eq!(batch.remaining(), 1);
    }

    #[test]
    fn deserialization_keeps_batch_invariants() {
        let batch: SelectionBatch =
            serde_json::from_str(r#"{"mode":"manual","target":2,"numbers":["00001","00002"]}"#)
                .unwrap();
        assert!(batch.is_full());

        let overfull = serde_json::from_str::<SelectionBatch>(
            r#"{"mode":"lucky","target":1,"numbers":["00001","00002"]}"#,
        );
        assert!(overfull.is_err());

        let repeated = serde_json::from_str::<SelectionBatch>(
            r#"{"mode":"manual","target":3,"numbers":["00004","00004"]}"#,
        );
        assert!(repeated.is_err());
    }
}
