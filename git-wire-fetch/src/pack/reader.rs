//! The streaming pack reader.
//!
//! Consumes a v2 pack from any `BufRead` (raw bytes or a side-band demux),
//! resolves OFS/REF deltas against a bounded base cache, writes every
//! materialized object to the store as it completes, and verifies the SHA-1
//! trailer over everything that went past.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Read};
use std::sync::Arc;

use sha1::{Digest, Sha1};

use git_wire_core::interrupt::Interrupt;
use git_wire_core::progress::ProgressSink;
use git_wire_core::store::ObjectStore;
use git_wire_core::transport::Phase;
use git_wire_core::{Object, ObjectId, ObjectKind};

use crate::pack::{apply_delta, Inflater};
use crate::{Error, Result};

/// Tuning knobs for pack ingestion.
#[derive(Debug, Clone, Copy)]
pub struct PackConfig {
    /// Maximum delta chain depth before ingestion fails.
    pub max_delta_chain: usize,
    /// Byte budget for the in-memory base cache. Evicted bases are
    /// re-materialized from the store, where every resolved object already
    /// lives.
    pub cache_budget_bytes: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            max_delta_chain: 50,
            cache_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

/// What a completed ingestion processed.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Number of objects the pack declared and delivered.
    pub objects: u32,
    /// Total pack bytes consumed, trailer included.
    pub bytes: u64,
    /// Ids of the materialized objects, in pack order.
    pub ids: Vec<ObjectId>,
}

/// Wraps the pack input, hashing every consumed byte and tracking offsets.
struct TrackedInput<R> {
    inner: R,
    hasher: Sha1,
    offset: u64,
}

impl<R: BufRead> TrackedInput<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            offset: 0,
        }
    }

    /// The SHA-1 of everything consumed so far.
    fn digest(&self) -> [u8; 20] {
        self.hasher.clone().finalize().into()
    }
}

impl<R: BufRead> Read for TrackedInput<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let available = self.inner.fill_buf()?;
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

impl<R: BufRead> BufRead for TrackedInput<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amount: usize) {
        // fill_buf is idempotent until consume, so the bytes being released
        // are still visible here for hashing.
        if let Ok(available) = self.inner.fill_buf() {
            let count = amount.min(available.len());
            self.hasher.update(&available[..count]);
            self.offset += count as u64;
            self.inner.consume(count);
        }
    }
}

/// A bounded cache of materialized delta bases, keyed by pack offset.
struct BaseCache {
    budget: usize,
    bytes: usize,
    order: VecDeque<u64>,
    entries: HashMap<u64, (ObjectKind, Arc<[u8]>)>,
}

impl BaseCache {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            bytes: 0,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, offset: u64, kind: ObjectKind, data: Arc<[u8]>) {
        if self.entries.contains_key(&offset) {
            return;
        }
        self.bytes += data.len();
        self.entries.insert(offset, (kind, data));
        self.order.push_back(offset);
        while self.bytes > self.budget && self.order.len() > 1 {
            if let Some(evicted) = self.order.pop_front() {
                if let Some((_, data)) = self.entries.remove(&evicted) {
                    self.bytes -= data.len();
                }
            }
        }
    }

    fn get(&self, offset: u64) -> Option<(ObjectKind, Arc<[u8]>)> {
        self.entries
            .get(&offset)
            .map(|(kind, data)| (*kind, Arc::clone(data)))
    }
}

/// Per-entry bookkeeping needed to resolve later deltas.
#[derive(Default)]
struct PackIndex {
    by_offset: HashMap<u64, (ObjectKind, ObjectId, usize)>,
    by_id: HashMap<ObjectId, u64>,
}

impl PackIndex {
    fn record(&mut self, offset: u64, kind: ObjectKind, id: ObjectId, depth: usize) {
        self.by_offset.insert(offset, (kind, id, depth));
        self.by_id.entry(id).or_insert(offset);
    }
}

/// Ingests one pack stream into `store`.
///
/// Returns `Ok(None)` when the stream is empty before the header, which is
/// how a server answers a negotiation that needs no objects sent.
pub fn ingest<R, S>(
    mut input: R,
    store: &mut S,
    config: &PackConfig,
    interrupt: &Interrupt,
    progress: &mut dyn ProgressSink,
) -> Result<Option<IngestStats>>
where
    R: BufRead,
    S: ObjectStore + ?Sized,
{
    if input
        .fill_buf()
        .map_err(|err| Error::from_io(err, Phase::PackReceive))?
        .is_empty()
    {
        return Ok(None);
    }

    let mut input = TrackedInput::new(input);
    let mut header = [0u8; 12];
    input
        .read_exact(&mut header)
        .map_err(|err| Error::from_io(err, Phase::PackReceive))?;
    if &header[..4] != b"PACK" {
        return Err(Error::MalformedPack("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != 2 {
        return Err(Error::MalformedPack(format!(
            "unsupported pack version {version}"
        )));
    }
    let count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

    let mut inflater = Inflater::new();
    let mut cache = BaseCache::new(config.cache_budget_bytes);
    let mut index = PackIndex::default();
    let mut ids = Vec::with_capacity(count as usize);

    for sequence in 0..count {
        interrupt.check().map_err(Error::Core)?;
        let offset = input.offset;
        let (code, size) = read_entry_header(&mut input)?;

        let (kind, data, depth) = match code {
            1..=4 => {
                let kind = ObjectKind::from_pack_code(code)
                    .ok_or(Error::BadObjectHeader(code))?;
                let data = inflater.inflate_exact(&mut input, size)?;
                (kind, data, 0)
            }
            6 => {
                let relative = read_ofs_offset(&mut input)?;
                let base_offset = offset.checked_sub(relative).ok_or_else(|| {
                    Error::MalformedPack(format!(
                        "ofs-delta at {offset} points {relative} bytes before the pack start"
                    ))
                })?;
                let delta = inflater.inflate_exact(&mut input, size)?;
                let (kind, base, base_depth) =
                    base_by_offset(base_offset, &cache, &index, store)?;
                let depth = base_depth + 1;
                if depth > config.max_delta_chain {
                    return Err(Error::DeltaChainTooDeep(depth));
                }
                (kind, apply_delta(&base, &delta)?, depth)
            }
            7 => {
                let mut raw = [0u8; 20];
                input
                    .read_exact(&mut raw)
                    .map_err(|err| Error::from_io(err, Phase::PackReceive))?;
                let base_id = ObjectId::from_bytes(raw);
                let delta = inflater.inflate_exact(&mut input, size)?;
                let (kind, base, base_depth) =
                    base_by_id(&base_id, &cache, &index, store)?;
                let depth = base_depth + 1;
                if depth > config.max_delta_chain {
                    return Err(Error::DeltaChainTooDeep(depth));
                }
                (kind, apply_delta(&base, &delta)?, depth)
            }
            other => return Err(Error::BadObjectHeader(other)),
        };

        let id = ObjectId::for_object(kind, &data);
        let data: Arc<[u8]> = Arc::from(data);
        store
            .write_object(Object::new(kind, data.to_vec()))
            .map_err(git_wire_core::Error::Store)
            .map_err(Error::Core)?;
        cache.insert(offset, kind, data);
        index.record(offset, kind, id, depth);
        ids.push(id);

        if (sequence + 1) % 1024 == 0 || sequence + 1 == count {
            progress.info(
                format!("Receiving objects: {}/{count}\r", sequence + 1).as_bytes(),
            );
        }
    }

    let expected = input.digest();
    let mut trailer = [0u8; 20];
    input
        .read_exact(&mut trailer)
        .map_err(|err| Error::from_io(err, Phase::PackReceive))?;
    if trailer != expected {
        return Err(Error::BadChecksum);
    }
    progress.info(format!("Receiving objects: {count}/{count}, done.\n").as_bytes());

    Ok(Some(IngestStats {
        objects: count,
        bytes: input.offset,
        ids,
    }))
}

/// Decodes the variable-length entry header: bits 6-4 of the first byte are
/// the type code, the low nibble plus 7 bits per continuation byte are the
/// inflated size.
fn read_entry_header<R: BufRead>(input: &mut R) -> Result<(u8, usize)> {
    let first = read_byte(input)?;
    let code = (first >> 4) & 0x07;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = read_byte(input)?;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if shift > 63 {
            return Err(Error::MalformedPack("entry size varint overflow".into()));
        }
    }
    Ok((code, size))
}

/// Decodes the ofs-delta base offset: big-endian groups of 7 bits where each
/// continuation adds one to the accumulated value before shifting.
fn read_ofs_offset<R: BufRead>(input: &mut R) -> Result<u64> {
    let mut byte = read_byte(input)?;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = read_byte(input)?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_mul(128))
            .ok_or_else(|| Error::MalformedPack("ofs-delta offset overflow".into()))?
            | u64::from(byte & 0x7f);
    }
    Ok(value)
}

fn read_byte<R: BufRead>(input: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    input
        .read_exact(&mut byte)
        .map_err(|err| Error::from_io(err, Phase::PackReceive))?;
    Ok(byte[0])
}

fn base_by_offset<S: ObjectStore + ?Sized>(
    offset: u64,
    cache: &BaseCache,
    index: &PackIndex,
    store: &S,
) -> Result<(ObjectKind, Arc<[u8]>, usize)> {
    let (kind, id, depth) = *index.by_offset.get(&offset).ok_or_else(|| {
        Error::MalformedPack(format!("ofs-delta references unknown offset {offset}"))
    })?;
    if let Some((kind, data)) = cache.get(offset) {
        return Ok((kind, data, depth));
    }
    let object = store
        .read_object(&id)
        .map_err(|_| Error::MissingDeltaBase(id.to_hex()))?;
    Ok((kind, Arc::from(object.data), depth))
}

fn base_by_id<S: ObjectStore + ?Sized>(
    id: &ObjectId,
    cache: &BaseCache,
    index: &PackIndex,
    store: &S,
) -> Result<(ObjectKind, Arc<[u8]>, usize)> {
    if let Some(&offset) = index.by_id.get(id) {
        return base_by_offset(offset, cache, index, store);
    }
    // Thin pack: the base lives only in the store.
    match store.read_object(id) {
        Ok(object) => Ok((object.kind, Arc::from(object.data), 0)),
        Err(_) => Err(Error::MissingDeltaBase(id.to_hex())),
    }
}
