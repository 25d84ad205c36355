//! The object-store seam.
//!
//! The protocol engines never touch an object database directly; everything
//! goes through [`ObjectStore`]. This is the only coupling between the wire
//! crates and whatever holds the objects, so a store can be a loose-object
//! directory, a pack-backed database or the in-memory store below.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use bstr::{BStr, BString};

use crate::hash::ObjectId;
use crate::object::{referenced_ids, Object};

/// The error type stores report. Deliberately opaque to the engines, which
/// wrap it into [`crate::Error::Store`].
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The capability interface the protocol engines consume.
pub trait ObjectStore {
    /// Whether the store holds an object with this id.
    fn has_object(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Reads an object by id.
    fn read_object(&self, id: &ObjectId) -> StoreResult<Object>;

    /// Writes an object, returning its content-addressed id.
    fn write_object(&mut self, object: Object) -> StoreResult<ObjectId>;

    /// Lists all refs as `(name, target)` pairs.
    fn list_refs(&self) -> StoreResult<Vec<(BString, ObjectId)>>;

    /// Reads one ref, `None` when it does not exist.
    fn read_ref(&self, name: &BStr) -> StoreResult<Option<ObjectId>>;

    /// Creates or updates one ref.
    fn write_ref(&mut self, name: &BStr, target: ObjectId) -> StoreResult<()>;

    /// Iterates every object reachable from `roots` through commits, trees
    /// and tags. Roots missing from the store are skipped, which is what the
    /// have-frontier of a push wants.
    fn reachable_from(
        &self,
        roots: &[ObjectId],
    ) -> StoreResult<Box<dyn Iterator<Item = ObjectId> + '_>>;
}

/// A heap-backed store, primarily for tests and small fixtures.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    objects: HashMap<ObjectId, Object>,
    refs: BTreeMap<BString, ObjectId>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of objects held.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl ObjectStore for InMemoryStore {
    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects.contains_key(id))
    }

    fn read_object(&self, id: &ObjectId) -> StoreResult<Object> {
        self.objects
            .get(id)
            .cloned()
            .ok_or_else(|| format!("object {id} not found").into())
    }

    fn write_object(&mut self, object: Object) -> StoreResult<ObjectId> {
        let id = object.id();
        self.objects.entry(id).or_insert(object);
        Ok(id)
    }

    fn list_refs(&self) -> StoreResult<Vec<(BString, ObjectId)>> {
        Ok(self
            .refs
            .iter()
            .map(|(name, target)| (name.clone(), *target))
            .collect())
    }

    fn read_ref(&self, name: &BStr) -> StoreResult<Option<ObjectId>> {
        Ok(self.refs.get(name).copied())
    }

    fn write_ref(&mut self, name: &BStr, target: ObjectId) -> StoreResult<()> {
        self.refs.insert(name.to_owned(), target);
        Ok(())
    }

    fn reachable_from(
        &self,
        roots: &[ObjectId],
    ) -> StoreResult<Box<dyn Iterator<Item = ObjectId> + '_>> {
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
        let mut order = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            order.push(id);
            for (child, _) in referenced_ids(object.kind, &object.data) {
                queue.push_back(child);
            }
        }
        Ok(Box::new(order.into_iter()))
    }
}
