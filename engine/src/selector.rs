//! Manual-mode selection: browse, toggle and type-in.

use crate::availability::AvailabilityIndex;
use crate::error::{EngineError, Result};
use crate::session::BuyerSession;
use raffle_core::{DateTime, SelectionBatch, TicketNumber, Utc};
use serde::{Deserialize, Serialize};

/// Effect of a [`ManualSelector::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Toggle {
    /// The number joined the selection.
    Added(TicketNumber),
    /// The number left the selection.
    Removed(TicketNumber),
}

/// Builds a selection one number at a time.
///
/// Toggling consults only the session's cached availability. Typed-in numbers
/// also get one fresh store check before they are accepted.
#[derive(Clone, Copy)]
pub struct ManualSelector<'a> {
    index: AvailabilityIndex<'a>,
}

impl<'a> ManualSelector<'a> {
    /// Selector checking typed-in numbers through `index`.
    #[must_use]
    pub const fn new(index: AvailabilityIndex<'a>) -> Self {
        Self { index }
    }

    /// Removes `number` if selected, otherwise tries to add it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoSelection`] if no selection was started.
    /// - [`EngineError::CapacityReached`] if the selection is full.
    /// - [`EngineError::AlreadyTaken`] if the cached availability has it.
    pub fn toggle(session: &mut BuyerSession, number: TicketNumber) -> Result<Toggle> {
        let cached_taken = session
            .availability
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(number));
        let batch = selection_mut(session)?;

        if batch.remove(number) {
            return Ok(Toggle::Removed(number));
        }
        if batch.is_full() {
            return Err(EngineError::CapacityReached {
                target: batch.target(),
            });
        }
        if cached_taken {
            return Err(EngineError::AlreadyTaken(number));
        }
        batch.insert(number);
        Ok(Toggle::Added(number))
    }

    /// Parses raw input and adds the number after a fresh store check.
    ///
    /// A number the store reports taken is also recorded in the session's
    /// cached availability.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] for malformed input.
    /// - [`EngineError::NoSelection`] if no selection was started.
    /// - [`EngineError::AlreadySelected`] if the number is already selected.
    /// - [`EngineError::CapacityReached`] if the selection is full.
    /// - [`EngineError::AlreadyTaken`] if the cache or the store has it.
    /// - [`EngineError::StoreUnavailable`] if the store check fails.
    #[tracing::instrument(skip(self, session))]
    pub async fn add_by_number(
        &self,
        session: &mut BuyerSession,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<TicketNumber> {
        let number = TicketNumber::parse(raw)?;
        {
            let batch = selection_mut(session)?;
            if batch.contains(number) {
                return Err(EngineError::AlreadySelected(number));
            }
            if batch.is_full() {
                return Err(EngineError::CapacityReached {
                    target: batch.target(),
                });
            }
        }
        if session
            .availability
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(number))
        {
            return Err(EngineError::AlreadyTaken(number));
        }

        if !self.index.is_free(number, now).await? {
            if let Some(snapshot) = session.availability.as_mut() {
                snapshot.insert(number);
            }
            tracing::debug!(%number, "Typed number taken since last refresh");
            return Err(EngineError::AlreadyTaken(number));
        }

        selection_mut(session)?.insert(number);
        Ok(number)
    }

    /// Removes `number` from the selection; `false` if it was not selected.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSelection`] if no selection was started.
    pub fn remove(session: &mut BuyerSession, number: TicketNumber) -> Result<bool> {
        Ok(selection_mut(session)?.remove(number))
    }

    /// Up to `limit` numbers from `start` onward that are neither cached as
    /// taken nor already selected, in ascending order.
    #[must_use]
    pub fn browse(session: &BuyerSession, start: TicketNumber, limit: usize) -> Vec<TicketNumber> {
        let selection = session.selection.as_ref();
        let snapshot = session.availability.as_ref();
        TicketNumber::all()
            .skip_while(|n| *n < start)
            .filter(|n| !snapshot.is_some_and(|s| s.contains(*n)))
            .filter(|n| !selection.is_some_and(|b| b.contains(*n)))
            .take(limit)
            .collect()
    }
}

fn selection_mut(session: &mut BuyerSession) -> Result<&mut SelectionBatch> {
    session.selection.as_mut().ok_or(EngineError::NoSelection)
}
