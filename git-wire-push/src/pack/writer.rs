//! The streaming pack writer.
//!
//! Emits a v2 pack for a planned object list, trying each object as a delta
//! against a sliding window of recently written objects of the same kind.
//! OFS_DELTA frames are used when the conversation negotiated `ofs-delta`;
//! REF_DELTA frames otherwise, and against out-of-pack bases in thin packs.

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use sha1::{Digest, Sha1};

use git_wire_core::progress::ProgressSink;
use git_wire_core::store::ObjectStore;
use git_wire_core::{ObjectId, ObjectKind};

use crate::pack::delta;
use crate::{Error, Result};

/// One object planned into the pack, payload read from the store on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    /// The object to include.
    pub id: ObjectId,
    /// Its kind.
    pub kind: ObjectKind,
    /// Payload size, used for ordering.
    pub size: usize,
    /// Hash of the path the object was first seen at during traversal;
    /// clusters delta candidates that likely resemble each other.
    pub path_hash: u32,
}

/// Pack generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// How many previous objects to try as delta bases.
    pub window: usize,
    /// Maximum delta chain depth the writer may produce.
    pub max_delta_depth: usize,
    /// Whether OFS_DELTA frames may be emitted.
    pub ofs_delta: bool,
    /// Whether deltas may reference bases outside the pack.
    pub thin: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            window: 10,
            max_delta_depth: 50,
            ofs_delta: false,
            thin: false,
        }
    }
}

/// Where an emitted object landed, for building a `.idx` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// CRC-32 of the entry's on-wire bytes.
    pub crc32: u32,
    /// Byte offset of the entry header within the pack.
    pub offset: u64,
}

struct WindowEntry {
    id: ObjectId,
    kind: ObjectKind,
    data: Vec<u8>,
    depth: usize,
    /// `None` for thin-pack seed bases that live outside the pack.
    offset: Option<u64>,
}

/// Writes a v2 pack containing `objects` to `out`, returning the
/// `id -> (crc32, offset)` side channel.
///
/// `seeds` are objects the receiver already has; with `config.thin` they
/// join the delta window as REF_DELTA bases without being emitted.
pub fn write_pack<S, W>(
    store: &S,
    objects: &[ObjectRef],
    seeds: &[ObjectRef],
    config: &WriterConfig,
    mut out: W,
    progress: &mut dyn ProgressSink,
) -> Result<HashMap<ObjectId, IndexEntry>>
where
    S: ObjectStore + ?Sized,
    W: Write,
{
    let mut ordered: Vec<ObjectRef> = objects.to_vec();
    ordered.sort_by(|a, b| {
        (a.kind.pack_code(), a.path_hash, std::cmp::Reverse(a.size))
            .cmp(&(b.kind.pack_code(), b.path_hash, std::cmp::Reverse(b.size)))
    });

    let mut hasher = Sha1::new();
    let mut offset = 0u64;
    let mut emit = |bytes: &[u8], out: &mut W, offset: &mut u64| -> Result<()> {
        hasher.update(bytes);
        out.write_all(bytes).map_err(git_wire_core::Error::Io)?;
        *offset += bytes.len() as u64;
        Ok(())
    };

    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(b"PACK");
    header.extend_from_slice(&2u32.to_be_bytes());
    header.extend_from_slice(&(ordered.len() as u32).to_be_bytes());
    emit(&header, &mut out, &mut offset)?;

    let mut window: VecDeque<WindowEntry> = VecDeque::new();
    if config.thin {
        for seed in seeds {
            let Ok(object) = store.read_object(&seed.id) else {
                continue;
            };
            window.push_back(WindowEntry {
                id: seed.id,
                kind: seed.kind,
                data: object.data,
                depth: 0,
                offset: None,
            });
        }
    }

    let mut index = HashMap::with_capacity(ordered.len());
    let mut deltas = 0u32;
    for (sequence, planned) in ordered.iter().enumerate() {
        let object = store
            .read_object(&planned.id)
            .map_err(|_| Error::MissingObject(planned.id))?;
        if object.kind != planned.kind {
            return Err(Error::MissingObject(planned.id));
        }

        let best = window
            .iter()
            .filter(|candidate| {
                candidate.kind == planned.kind
                    && candidate.depth + 1 <= config.max_delta_depth
                    // Out-of-pack bases are only legal in thin packs.
                    && (candidate.offset.is_some() || config.thin)
            })
            .filter_map(|candidate| {
                let encoded = delta(&candidate.data, &object.data);
                (encoded.len() < object.data.len()).then_some((candidate, encoded))
            })
            .min_by_key(|(_, encoded)| encoded.len());

        let entry_offset = offset;
        let mut entry = Vec::new();
        let depth = match best {
            Some((base, encoded)) => {
                match base.offset {
                    Some(base_offset) if config.ofs_delta => {
                        write_entry_header(&mut entry, 6, encoded.len());
                        write_ofs_offset(&mut entry, entry_offset - base_offset);
                    }
                    _ => {
                        write_entry_header(&mut entry, 7, encoded.len());
                        entry.extend_from_slice(base.id.as_bytes());
                    }
                }
                entry.extend_from_slice(&deflate(&encoded)?);
                deltas += 1;
                base.depth + 1
            }
            None => {
                write_entry_header(&mut entry, planned.kind.pack_code(), object.data.len());
                entry.extend_from_slice(&deflate(&object.data)?);
                0
            }
        };

        let mut crc = Crc::new();
        crc.update(&entry);
        emit(&entry, &mut out, &mut offset)?;
        index.insert(
            planned.id,
            IndexEntry {
                crc32: crc.sum(),
                offset: entry_offset,
            },
        );

        window.push_back(WindowEntry {
            id: planned.id,
            kind: planned.kind,
            data: object.data,
            depth,
            offset: Some(entry_offset),
        });
        while window.len() > config.window.max(1) {
            window.pop_front();
        }

        if (sequence + 1) % 256 == 0 {
            progress.info(
                format!("Compressing objects: {}/{}\r", sequence + 1, ordered.len()).as_bytes(),
            );
        }
    }

    let digest: [u8; 20] = hasher.finalize().into();
    out.write_all(&digest).map_err(git_wire_core::Error::Io)?;
    out.flush().map_err(git_wire_core::Error::Io)?;
    tracing::debug!(
        objects = ordered.len(),
        deltas,
        bytes = offset + 20,
        "pack written"
    );
    Ok(index)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|err| Error::Core(err.into()))
}

/// The entry header: type in bits 6-4 of the first byte, size in the low
/// nibble plus 7 bits per continuation byte.
fn write_entry_header(out: &mut Vec<u8>, code: u8, mut size: usize) {
    let mut byte = (code << 4) | ((size & 0x0f) as u8);
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// The ofs-delta distance: big-endian 7-bit groups, each continuation
/// adding one before the shift.
fn write_ofs_offset(out: &mut Vec<u8>, mut distance: u64) {
    let mut bytes = vec![(distance & 0x7f) as u8];
    while distance >> 7 > 0 {
        distance = (distance >> 7) - 1;
        bytes.push(0x80 | (distance & 0x7f) as u8);
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_wire_core::progress::Discard;
    use git_wire_core::store::InMemoryStore;
    use git_wire_core::Object;

    fn plan(store: &mut InMemoryStore, kind: ObjectKind, data: &[u8], path_hash: u32) -> ObjectRef {
        let id = store
            .write_object(Object::new(kind, data.to_vec()))
            .unwrap();
        ObjectRef {
            id,
            kind,
            size: data.len(),
            path_hash,
        }
    }

    #[test]
    fn header_count_and_trailer_are_wellformed() {
        let mut store = InMemoryStore::new();
        let a = plan(&mut store, ObjectKind::Blob, b"first blob", 1);
        let b = plan(&mut store, ObjectKind::Blob, b"second blob", 2);

        let mut pack = Vec::new();
        let index = write_pack(
            &store,
            &[a, b],
            &[],
            &WriterConfig::default(),
            &mut pack,
            &mut Discard,
        )
        .unwrap();

        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]), 2);
        assert_eq!(u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]), 2);
        let digest: [u8; 20] = Sha1::digest(&pack[..pack.len() - 20]).into();
        assert_eq!(&pack[pack.len() - 20..], digest);
        assert_eq!(index.len(), 2);
        assert_eq!(index[&a.id].offset, 12);
    }

    #[test]
    fn missing_object_is_reported() {
        let store = InMemoryStore::new();
        let ghost = ObjectRef {
            id: ObjectId::from_bytes([9; 20]),
            kind: ObjectKind::Blob,
            size: 4,
            path_hash: 0,
        };
        let mut pack = Vec::new();
        assert!(matches!(
            write_pack(
                &store,
                &[ghost],
                &[],
                &WriterConfig::default(),
                &mut pack,
                &mut Discard,
            ),
            Err(Error::MissingObject(_))
        ));
    }

    #[test]
    fn ofs_offset_encoding_matches_the_reader() {
        // Mirrors the decoder: value = ((value + 1) << 7) | low, per byte.
        fn decode(bytes: &[u8]) -> u64 {
            let mut value = u64::from(bytes[0] & 0x7f);
            for &byte in &bytes[1..] {
                value = ((value + 1) << 7) | u64::from(byte & 0x7f);
            }
            value
        }
        for distance in [1u64, 127, 128, 129, 255, 256, 16384, 16511, 1 << 20] {
            let mut out = Vec::new();
            write_ofs_offset(&mut out, distance);
            // Continuation bits set on all but the last byte.
            for byte in &out[..out.len() - 1] {
                assert!(byte & 0x80 != 0);
            }
            assert_eq!(out.last().unwrap() & 0x80, 0);
            assert_eq!(decode(&out), distance, "distance {distance}");
        }
    }
}
