//! Negotiation data types and the pluggable negotiator.

use git_wire_core::ObjectId;

mod tips;
mod walk;

pub use tips::RefTips;
pub use walk::ConsecutiveWalk;

/// The shallow boundary change announced by the server during a deepening
/// fetch. Delivered to the caller exactly once per conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShallowUpdate<T = ObjectId> {
    /// Commits that became shallow boundaries.
    pub shallow: Vec<T>,
    /// Commits whose history is now complete again.
    pub unshallow: Vec<T>,
}

// Manual impl: the derive would demand `T: Default` although none is needed.
impl<T> Default for ShallowUpdate<T> {
    fn default() -> Self {
        Self {
            shallow: Vec::new(),
            unshallow: Vec::new(),
        }
    }
}

impl<T> ShallowUpdate<T> {
    /// Whether the server announced any boundary change.
    pub fn is_empty(&self) -> bool {
        self.shallow.is_empty() && self.unshallow.is_empty()
    }
}

/// How the server qualified an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// `ACK <id> common`: the object is common, keep negotiating.
    Common,
    /// `ACK <id> ready`: the server can already build the pack.
    Ready,
    /// `ACK <id> continue`: plain `multi_ack`'s common marker.
    Continue,
    /// A bare `ACK <id>`, the final acknowledgment before the pack.
    Ack,
}

/// One acknowledgment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack<T = ObjectId> {
    /// The acknowledged object.
    pub id: T,
    /// The qualifier the server attached.
    pub kind: AckKind,
}

/// Everything one negotiation round's response carried.
#[derive(Debug, Clone)]
pub struct Acks<T = ObjectId> {
    /// `shallow` lines seen in this response.
    pub shallow: Vec<T>,
    /// `unshallow` lines seen in this response.
    pub unshallow: Vec<T>,
    /// Acknowledgments in server order. A round answered only with `NAK`
    /// leaves this empty.
    pub acks: Vec<Ack<T>>,
}

impl<T> Default for Acks<T> {
    fn default() -> Self {
        Self {
            shallow: Vec::new(),
            unshallow: Vec::new(),
            acks: Vec::new(),
        }
    }
}

impl<T> Acks<T> {
    /// Whether the server signalled it can already build the pack.
    pub fn ready(&self) -> bool {
        self.acks
            .iter()
            .any(|ack| matches!(ack.kind, AckKind::Ready | AckKind::Ack))
    }

    /// The objects the server confirmed as common, whatever the dialect.
    pub fn common(&self) -> impl Iterator<Item = &T> {
        self.acks.iter().map(|ack| &ack.id)
    }
}

/// What the negotiator wants the engine to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Round {
    /// Send these `have` lines and run another round.
    Again(Vec<ObjectId>),
    /// Nothing further to offer; the engine may conclude with `done`.
    Ready,
    /// Negotiation is over; conclude with `done`.
    Done,
}

/// Chooses which `have` candidates to offer each round.
///
/// The engine calls [`Negotiator::next`] with the previous round's
/// acknowledgments (empty on the first call) until it returns
/// [`Round::Ready`] or [`Round::Done`], or the server reports readiness.
pub trait Negotiator {
    /// Produces the next round's candidates.
    fn next(&mut self, acks: &Acks) -> Round;
}

/// How far a fetch wants to deepen a shallow history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepenSpec {
    /// `deepen <n>`: limit history to `n` commits from each tip.
    Depth(u32),
    /// `deepen-since <timestamp>`: keep commits newer than a Unix time.
    Since(i64),
    /// `deepen-not <ref>`: exclude history reachable from a ref.
    Not(bstr::BString),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    #[test]
    fn ready_is_set_by_ready_and_final_acks() {
        let mut acks = Acks::default();
        acks.acks.push(Ack { id: id(1), kind: AckKind::Common });
        assert!(!acks.ready());
        acks.acks.push(Ack { id: id(1), kind: AckKind::Ready });
        assert!(acks.ready());

        let finals = Acks {
            acks: vec![Ack { id: id(2), kind: AckKind::Ack }],
            ..Default::default()
        };
        assert!(finals.ready());
    }
}
