//! End-to-end push conversations against scripted servers.

use std::io::{Cursor, Read, Write};

use bstr::BString;

use git_wire_core::advert::{render, Advertised, Advertisement};
use git_wire_core::capability::CapabilitySet;
use git_wire_core::pktline::Writer as PktWriter;
use git_wire_core::progress::Discard;
use git_wire_core::store::{InMemoryStore, ObjectStore};
use git_wire_core::transport::{PhasedStream, StreamTransport};
use git_wire_core::{Object, ObjectId, ObjectKind};
use git_wire_push::{
    push, update_and_create, Command, Error, PushDelegate, PushOptions, RefStatus,
};

struct MockStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl PhasedStream for MockStream {}

fn stateful(input: Vec<u8>) -> StreamTransport<MockStream> {
    StreamTransport::new(MockStream {
        input: Cursor::new(input),
        output: Vec::new(),
    })
}

fn advert_bytes(refs: &[(&str, ObjectId)], caps: &str) -> Vec<u8> {
    render(&Advertisement {
        refs: refs
            .iter()
            .map(|(name, target)| Advertised {
                target: *target,
                name: (*name).into(),
                peeled: false,
            })
            .collect(),
        capabilities: CapabilitySet::parse(caps.as_bytes()),
    })
    .unwrap()
}

fn report_bytes(lines: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut frames = PktWriter::new(&mut out);
    for line in lines {
        frames.write_text(line.as_bytes()).unwrap();
    }
    frames.write_flush().unwrap();
    out
}

/// A local store holding a two-commit history over one file.
fn local_history() -> (InMemoryStore, ObjectId, ObjectId) {
    let mut store = InMemoryStore::new();
    let blob = store
        .write_object(Object::new(ObjectKind::Blob, b"version one\n".to_vec()))
        .unwrap();
    let mut tree = Vec::new();
    tree.extend_from_slice(b"100644 file.txt\0");
    tree.extend_from_slice(blob.as_bytes());
    let tree = store
        .write_object(Object::new(ObjectKind::Tree, tree))
        .unwrap();
    let old = store
        .write_object(Object::new(
            ObjectKind::Commit,
            format!("tree {tree}\nauthor A <a@e> 1 +0000\n\none\n").into_bytes(),
        ))
        .unwrap();
    let new = store
        .write_object(Object::new(
            ObjectKind::Commit,
            format!("tree {tree}\nparent {old}\nauthor A <a@e> 2 +0000\n\ntwo\n").into_bytes(),
        ))
        .unwrap();
    store.write_ref("refs/heads/main".into(), new).unwrap();
    (store, old, new)
}

#[test]
fn fast_forward_push_sends_a_minimal_pack_and_reads_ok() {
    let (store, old, new) = local_history();
    let mut input = advert_bytes(
        &[("refs/heads/main", old)],
        "report-status delete-refs ofs-delta agent=git/2.43.0",
    );
    input.extend_from_slice(&report_bytes(&["unpack ok", "ok refs/heads/main"]));

    let mut transport = stateful(input);
    let outcome = update_and_create(
        &mut transport,
        &store,
        None,
        &PushOptions::default(),
        &mut Discard,
    )
    .unwrap();

    assert!(outcome.skipped.is_empty());
    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.refs.len(), 1);
    assert_eq!(outcome.report.refs[0].name, "refs/heads/main");

    let sent = transport.into_inner().output;
    let text = String::from_utf8_lossy(&sent);
    assert!(text.contains(&format!("{} {} refs/heads/main", old.to_hex(), new.to_hex())));
    assert!(text.contains("report-status"));

    // The pack carries the new commit only: the tree and blob are already on
    // the server, being reachable from the old tip.
    let pack_start = sent
        .windows(4)
        .position(|w| w == b"PACK")
        .expect("a pack follows the commands");
    let count = u32::from_be_bytes([
        sent[pack_start + 8],
        sent[pack_start + 9],
        sent[pack_start + 10],
        sent[pack_start + 11],
    ]);
    assert_eq!(count, 1);
}

#[test]
fn rejected_push_surfaces_the_reason_as_data() {
    let (store, old, new) = local_history();
    // The server has moved past `old`; its tip is unknown to us, but the
    // caller insists on the update and lets the server judge.
    let server_tip = ObjectId::from_bytes([0xcd; 20]);

    struct Insist {
        old: ObjectId,
        new: ObjectId,
    }
    impl PushDelegate for Insist {
        fn push(
            &mut self,
            _refs: &[Advertised],
            _caps: &CapabilitySet,
        ) -> git_wire_push::Result<(Vec<ObjectId>, Vec<Command>)> {
            Ok((
                vec![self.old],
                vec![Command::Update {
                    old: self.old,
                    new: self.new,
                    name: "refs/heads/main".into(),
                }],
            ))
        }
    }

    let mut input = advert_bytes(&[("refs/heads/main", server_tip)], "report-status");
    input.extend_from_slice(&report_bytes(&[
        "unpack ok",
        "ng refs/heads/main non-fast-forward",
    ]));

    let mut transport = stateful(input);
    let outcome = push(
        &mut transport,
        &store,
        &mut Insist { old, new },
        &PushOptions::default(),
    )
    .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.refs[0].status,
        RefStatus::Rejected("non-fast-forward".into())
    );
}

#[test]
fn out_of_date_refs_are_skipped_not_forced() {
    let (store, _old, _new) = local_history();
    // The advertised tip is unknown locally, so update_and_create must skip
    // rather than fabricate an update command.
    let unknown = ObjectId::from_bytes([0xee; 20]);
    let input = advert_bytes(&[("refs/heads/main", unknown)], "report-status");

    let mut transport = stateful(input);
    let outcome = update_and_create(
        &mut transport,
        &store,
        None,
        &PushOptions::default(),
        &mut Discard,
    )
    .unwrap();

    assert_eq!(outcome.skipped, vec![BString::from("refs/heads/main")]);
    assert!(outcome.report.refs.is_empty());
    // Nothing was sent: no commands, no pack.
    assert!(transport.into_inner().output.is_empty());
}

#[test]
fn deletes_require_the_delete_refs_capability() {
    let (store, old, _new) = local_history();

    struct DeleteIt {
        old: ObjectId,
    }
    impl PushDelegate for DeleteIt {
        fn push(
            &mut self,
            _refs: &[Advertised],
            _caps: &CapabilitySet,
        ) -> git_wire_push::Result<(Vec<ObjectId>, Vec<Command>)> {
            Ok((
                Vec::new(),
                vec![Command::Delete {
                    old: self.old,
                    name: "refs/heads/main".into(),
                }],
            ))
        }
    }

    let input = advert_bytes(&[("refs/heads/main", old)], "report-status");
    let mut transport = stateful(input);
    let result = push(
        &mut transport,
        &store,
        &mut DeleteIt { old },
        &PushOptions::default(),
    );
    assert!(matches!(result, Err(Error::DeleteUnsupported)));
}

#[test]
fn sidebanded_report_status_is_demultiplexed() {
    let (store, old, _new) = local_history();
    let report = report_bytes(&["unpack ok", "ok refs/heads/main"]);

    let mut input = advert_bytes(
        &[("refs/heads/main", old)],
        "report-status side-band-64k delete-refs",
    );
    {
        let mut frames = PktWriter::new(&mut input);
        let mut frame = vec![1u8];
        frame.extend_from_slice(&report);
        frames.write_data(&frame).unwrap();
        let mut progress = vec![2u8];
        progress.extend_from_slice(b"Resolving deltas: done\n");
        frames.write_data(&progress).unwrap();
        frames.write_flush().unwrap();
    }

    let mut transport = stateful(input);
    let outcome = update_and_create(
        &mut transport,
        &store,
        None,
        &PushOptions::default(),
        &mut Discard,
    )
    .unwrap();
    assert!(outcome.report.is_success());
}

#[test]
fn create_commands_are_used_for_new_refs() {
    let (store, _old, new) = local_history();
    // Empty repository on the server side.
    let mut input = advert_bytes(&[], "report-status delete-refs");
    input.extend_from_slice(&report_bytes(&["unpack ok", "ok refs/heads/main"]));

    let mut transport = stateful(input);
    let outcome = update_and_create(
        &mut transport,
        &store,
        None,
        &PushOptions::default(),
        &mut Discard,
    )
    .unwrap();
    assert!(outcome.report.is_success());

    let sent = transport.into_inner().output;
    let text = String::from_utf8_lossy(&sent);
    assert!(text.contains(&format!(
        "0000000000000000000000000000000000000000 {} refs/heads/main",
        new.to_hex()
    )));
    // A full pack: commit, tree and blob all travel.
    let pack_start = sent
        .windows(4)
        .position(|w| w == b"PACK")
        .expect("a pack follows the commands");
    let count = u32::from_be_bytes([
        sent[pack_start + 8],
        sent[pack_start + 9],
        sent[pack_start + 10],
        sent[pack_start + 11],
    ]);
    assert_eq!(count, 4);
}
