//! The simplest negotiator: offer every local ref tip once.

use git_wire_core::ObjectId;

use crate::negotiate::{Acks, Negotiator, Round};

/// Offers all known ref tips in a single round, then concludes. Cheap and
/// adequate when local history is short or mostly disjoint from the remote.
#[derive(Debug, Clone)]
pub struct RefTips {
    tips: Vec<ObjectId>,
    offered: bool,
}

impl RefTips {
    /// Creates a negotiator over the given tips, typically every local ref
    /// target, deduplicated.
    pub fn new(tips: impl IntoIterator<Item = ObjectId>) -> Self {
        let mut tips: Vec<ObjectId> = tips.into_iter().collect();
        tips.sort_unstable();
        tips.dedup();
        Self {
            tips,
            offered: false,
        }
    }
}

impl Negotiator for RefTips {
    fn next(&mut self, acks: &Acks) -> Round {
        if acks.ready() {
            return Round::Done;
        }
        if self.offered || self.tips.is_empty() {
            return Round::Done;
        }
        self.offered = true;
        Round::Again(std::mem::take(&mut self.tips))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn offers_tips_once_then_concludes() {
        let mut negotiator = RefTips::new([id(1), id(2), id(1)]);
        match negotiator.next(&Acks::default()) {
            Round::Again(haves) => assert_eq!(haves.len(), 2),
            other => panic!("expected a have round, got {other:?}"),
        }
        assert_eq!(negotiator.next(&Acks::default()), Round::Done);
    }

    #[test]
    fn empty_store_concludes_immediately() {
        let mut negotiator = RefTips::new([]);
        assert_eq!(negotiator.next(&Acks::default()), Round::Done);
    }
}
