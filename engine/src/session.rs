//! Per-buyer session context.

use rand::rngs::StdRng;
use rand::SeedableRng;
use raffle_core::{AvailabilitySet, Buyer, SelectionBatch, TicketNumber};

/// Everything the engine knows about one buyer's visit.
///
/// Engine operations take `&mut BuyerSession`, so a session can have at most
/// one operation (in particular, one commit) in flight at a time. Sessions
/// share nothing with each other; contention between buyers is resolved only
/// by the store.
#[derive(Debug)]
pub struct BuyerSession {
    pub(crate) buyer: Buyer,
    pub(crate) selection: Option<SelectionBatch>,
    pub(crate) availability: Option<AvailabilitySet>,
    pub(crate) confirmed: Vec<TicketNumber>,
    pub(crate) rng: StdRng,
}

impl BuyerSession {
    /// A fresh session with an entropy-seeded generator.
    #[must_use]
    pub fn new(buyer: Buyer) -> Self {
        Self::with_rng(buyer, StdRng::from_entropy())
    }

    /// A session whose lucky draws are reproducible.
    #[must_use]
    pub fn with_seed(buyer: Buyer, seed: u64) -> Self {
        Self::with_rng(buyer, StdRng::seed_from_u64(seed))
    }

    fn with_rng(buyer: Buyer, rng: StdRng) -> Self {
        Self {
            buyer,
            selection: None,
            availability: None,
            confirmed: Vec::new(),
            rng,
        }
    }

    /// The buyer owning this session.
    #[must_use]
    pub const fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    /// The pending selection, if one was started.
    #[must_use]
    pub const fn selection(&self) -> Option<&SelectionBatch> {
        self.selection.as_ref()
    }

    /// The last availability snapshot, if one was read.
    #[must_use]
    pub const fn availability(&self) -> Option<&AvailabilitySet> {
        self.availability.as_ref()
    }

    /// Numbers durably reserved for this buyer during the session.
    #[must_use]
    pub fn confirmed(&self) -> &[TicketNumber] {
        &self.confirmed
    }

    /// Drops the pending selection.
    pub fn abandon_selection(&mut self) {
        self.selection = None;
    }

    pub(crate) fn record_confirmed(&mut self, numbers: impl IntoIterator<Item = TicketNumber>) {
        for number in numbers {
            if !self.confirmed.contains(&number) {
                self.confirmed.push(number);
            }
        }
    }
}
