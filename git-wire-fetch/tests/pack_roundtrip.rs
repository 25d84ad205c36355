//! Write-then-read pack properties: the reader must reproduce exactly what
//! the writer was given, for plain, ofs-delta and thin packs.

use git_wire_core::interrupt::Interrupt;
use git_wire_core::progress::Discard;
use git_wire_core::store::{InMemoryStore, ObjectStore};
use git_wire_core::{Object, ObjectId, ObjectKind};
use git_wire_fetch::pack::{ingest, PackConfig};
use git_wire_push::pack::{write_pack, ObjectRef, WriterConfig};
use proptest::prelude::*;

fn object_ref(store: &InMemoryStore, id: ObjectId, path_hash: u32) -> ObjectRef {
    let object = store.read_object(&id).unwrap();
    ObjectRef {
        id,
        kind: object.kind,
        size: object.data.len(),
        path_hash,
    }
}

fn ingest_into(pack: &[u8], store: &mut InMemoryStore) -> git_wire_fetch::Result<u32> {
    let stats = ingest(
        pack,
        store,
        &PackConfig::default(),
        &Interrupt::new(),
        &mut Discard,
    )?;
    Ok(stats.map(|s| s.objects).unwrap_or(0))
}

fn round_trip(source: &InMemoryStore, refs: &[ObjectRef], config: &WriterConfig) {
    let mut pack = Vec::new();
    write_pack(source, refs, &[], config, &mut pack, &mut Discard).unwrap();

    let mut target = InMemoryStore::new();
    let count = ingest_into(&pack, &mut target).unwrap();
    assert_eq!(count as usize, refs.len());
    for r in refs {
        assert_eq!(
            target.read_object(&r.id).unwrap(),
            source.read_object(&r.id).unwrap(),
            "object {} must survive the round trip",
            r.id
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Similar payloads force the writer through its delta path; the reader
    /// must still reproduce every object byte for byte.
    #[test]
    fn packs_round_trip(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..2048), 1..12),
        ofs in any::<bool>(),
        mutate in proptest::collection::vec((0usize..2048, any::<u8>()), 0..8),
    ) {
        let mut store = InMemoryStore::new();
        let mut refs = Vec::new();
        for (index, payload) in payloads.iter().enumerate() {
            let id = store
                .write_object(Object::new(ObjectKind::Blob, payload.clone()))
                .unwrap();
            refs.push(object_ref(&store, id, index as u32));

            // A mutated sibling of each payload, a natural delta candidate.
            let mut sibling = payload.clone();
            for (position, byte) in &mutate {
                if !sibling.is_empty() {
                    let position = position % sibling.len();
                    sibling[position] = *byte;
                }
            }
            sibling.extend_from_slice(b"-sibling");
            let id = store
                .write_object(Object::new(ObjectKind::Blob, sibling))
                .unwrap();
            refs.push(object_ref(&store, id, index as u32));
        }
        refs.sort_by_key(|r| r.id);
        refs.dedup_by_key(|r| r.id);

        let config = WriterConfig { ofs_delta: ofs, ..Default::default() };
        round_trip(&store, &refs, &config);
    }
}

#[test]
fn commit_history_round_trips_with_ofs_deltas() {
    let mut store = InMemoryStore::new();
    let mut refs = Vec::new();
    let mut parent: Option<ObjectId> = None;
    for generation in 0u32..30 {
        let blob = store
            .write_object(Object::new(
                ObjectKind::Blob,
                format!("shared prefix that barely changes, revision {generation}\n")
                    .repeat(20)
                    .into_bytes(),
            ))
            .unwrap();
        let mut tree = Vec::new();
        tree.extend_from_slice(b"100644 file.txt\0");
        tree.extend_from_slice(blob.as_bytes());
        let tree = store
            .write_object(Object::new(ObjectKind::Tree, tree))
            .unwrap();
        let mut commit = format!("tree {tree}\n").into_bytes();
        if let Some(parent) = parent {
            commit.extend_from_slice(format!("parent {parent}\n").as_bytes());
        }
        commit.extend_from_slice(
            format!("author A <a@e> {generation} +0000\n\nrev {generation}\n").as_bytes(),
        );
        let commit = store
            .write_object(Object::new(ObjectKind::Commit, commit))
            .unwrap();
        parent = Some(commit);
        refs.push(object_ref(&store, blob, 1));
        refs.push(object_ref(&store, tree, 2));
        refs.push(object_ref(&store, commit, 0));
    }

    let config = WriterConfig {
        ofs_delta: true,
        window: 10,
        ..Default::default()
    };
    round_trip(&store, &refs, &config);
}

#[test]
fn thin_pack_resolves_against_the_receiver_store() {
    let mut source = InMemoryStore::new();
    let base_payload = b"a long shared payload that the delta should copy from".repeat(8);
    let base = source
        .write_object(Object::new(ObjectKind::Blob, base_payload.clone()))
        .unwrap();
    let mut updated = base_payload;
    updated.extend_from_slice(b" with a tail");
    let tip = source
        .write_object(Object::new(ObjectKind::Blob, updated.clone()))
        .unwrap();

    let refs = [object_ref(&source, tip, 0)];
    let seeds = [object_ref(&source, base, 0)];
    let config = WriterConfig {
        thin: true,
        ..Default::default()
    };
    let mut pack = Vec::new();
    write_pack(&source, &refs, &seeds, &config, &mut pack, &mut Discard).unwrap();

    // The pack must reference the seed, not contain it.
    assert!(
        pack.windows(20).any(|w| w == base.as_bytes()),
        "expected a ref-delta against the out-of-pack base"
    );

    // A receiver without the base cannot resolve the thin pack.
    let mut empty = InMemoryStore::new();
    assert!(matches!(
        ingest_into(&pack, &mut empty),
        Err(git_wire_fetch::Error::MissingDeltaBase(_))
    ));

    // A receiver holding the base resolves it to the exact object.
    let mut receiver = InMemoryStore::new();
    receiver
        .write_object(Object::new(ObjectKind::Blob, source.read_object(&base).unwrap().data))
        .unwrap();
    ingest_into(&pack, &mut receiver).unwrap();
    assert_eq!(receiver.read_object(&tip).unwrap().data, updated);
}
