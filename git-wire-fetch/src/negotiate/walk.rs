//! A commit-walking negotiator that skips acknowledged ancestry.

use std::collections::{HashMap, HashSet, VecDeque};

use git_wire_core::object::commit_parents;
use git_wire_core::store::ObjectStore;
use git_wire_core::{ObjectId, ObjectKind};

use crate::negotiate::{Acks, Negotiator, Round};

const BATCH: usize = 32;

/// Walks the local commit graph breadth-first from the ref tips, offering a
/// batch of candidates per round. Once the server acknowledges a commit,
/// that commit and everything it reaches is common and is skipped instead of
/// offered.
///
/// The graph is snapshotted at construction time, so the negotiator holds no
/// borrow of the store while the fetch that uses it writes new objects.
#[derive(Debug, Clone)]
pub struct ConsecutiveWalk {
    order: VecDeque<ObjectId>,
    parents: HashMap<ObjectId, Vec<ObjectId>>,
    common: HashSet<ObjectId>,
}

impl ConsecutiveWalk {
    /// Creates a walk starting from `tips`, usually every local ref target.
    pub fn new<S: ObjectStore + ?Sized>(
        store: &S,
        tips: impl IntoIterator<Item = ObjectId>,
    ) -> Self {
        let mut order = VecDeque::new();
        let mut parents: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ObjectId> = tips
            .into_iter()
            .filter(|tip| seen.insert(*tip))
            .collect();
        while let Some(id) = queue.pop_front() {
            let Ok(object) = store.read_object(&id) else {
                continue;
            };
            if object.kind != ObjectKind::Commit {
                continue;
            }
            let direct = commit_parents(&object.data);
            order.push_back(id);
            for parent in &direct {
                if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
            parents.insert(id, direct);
        }
        Self {
            order,
            parents,
            common: HashSet::new(),
        }
    }

    /// Marks `id` and its whole ancestry as common.
    fn mark_common(&mut self, id: ObjectId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if !self.common.insert(id) {
                continue;
            }
            if let Some(direct) = self.parents.get(&id) {
                pending.extend(direct.iter().copied());
            }
        }
    }
}

impl Negotiator for ConsecutiveWalk {
    fn next(&mut self, acks: &Acks) -> Round {
        for id in acks.common() {
            self.mark_common(*id);
        }
        if acks.ready() {
            return Round::Done;
        }

        let mut batch = Vec::with_capacity(BATCH);
        while batch.len() < BATCH {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            if self.common.contains(&id) {
                continue;
            }
            batch.push(id);
        }

        if batch.is_empty() {
            Round::Done
        } else {
            Round::Again(batch)
        }
    }
}
