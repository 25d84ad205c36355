//! The user-visible fetch operations.

use std::collections::HashSet;

use bstr::{BStr, BString, ByteSlice};

use git_wire_core::advert::{self, Advertised, Advertisement};
use git_wire_core::capability::{Capability, CapabilitySet, MultiAckMode};
use git_wire_core::interrupt::Interrupt;
use git_wire_core::object::{commit_parents, referenced_ids};
use git_wire_core::pktline::Reader;
use git_wire_core::progress::{Discard, ProgressSink};
use git_wire_core::sideband::{Demux, SideBandMode};
use git_wire_core::store::{ObjectStore, StoreError};
use git_wire_core::transport::{Phase, Service, Transport};
use git_wire_core::{ObjectId, ObjectKind};

use crate::engine::{self, Session};
use crate::negotiate::{ConsecutiveWalk, DeepenSpec, Negotiator, ShallowUpdate};
use crate::pack::{self, PackConfig};
use crate::{Error, Result};

/// Agent string asserted when the server advertises `agent`.
const AGENT: &str = concat!("git-wire/", env!("CARGO_PKG_VERSION"));

/// Callbacks one fetch conversation consults.
pub trait FetchDelegate {
    /// Chooses what to request, given the advertisement. Returning an empty
    /// list ends the conversation with nothing exchanged past the
    /// advertisement.
    fn want(
        &mut self,
        refs: &[Advertised],
        capabilities: &CapabilitySet,
    ) -> Result<Vec<ObjectId>>;

    /// Receives the shallow boundary update of a deepening fetch. Called at
    /// most once per conversation.
    fn notify(&mut self, _update: ShallowUpdate) {}

    /// Receives progress text, both the server's side-band messages and the
    /// local pack reader's counters.
    fn progress(&mut self, _message: &[u8]) {}
}

/// Options shaping one fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// The client's current shallow boundary commits.
    pub shallow: Vec<ObjectId>,
    /// Deepening request for shallow histories.
    pub deepen: Option<DeepenSpec>,
    /// Ask for a thin pack when the server offers one.
    pub thin: bool,
    /// Ask the server to include annotated tags pointing into the fetched
    /// history.
    pub include_tag: bool,
    /// Ask the server to suppress side-band progress.
    pub no_progress: bool,
    /// Pack ingestion tuning.
    pub pack: PackConfig,
    /// Cancellation flag checked at every suspension point.
    pub interrupt: Interrupt,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            shallow: Vec::new(),
            deepen: None,
            thin: true,
            include_tag: false,
            no_progress: false,
            pack: PackConfig::default(),
            interrupt: Interrupt::new(),
        }
    }
}

/// What one fetch conversation produced.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// The advertised refs whose targets were requested, as `(name, id)`.
    pub refs: Vec<(BString, ObjectId)>,
    /// Bytes of pack data consumed.
    pub pack_bytes: u64,
    /// Objects the pack delivered.
    pub objects: u32,
}

/// The result of the ref-updating conveniences. Ref updates happen only
/// after the pack has been fully received and verified; a failure partway
/// through the updates leaves the earlier ones committed and reports the
/// rest as pending.
#[derive(Debug)]
pub struct RefUpdateOutcome {
    /// Refs written, in order.
    pub updated: Vec<(BString, ObjectId)>,
    /// Refs not written because an earlier update failed.
    pub pending: Vec<(BString, ObjectId)>,
    /// The store failure that stopped the updates, if any.
    pub failure: Option<StoreError>,
    /// Bytes of pack data consumed.
    pub pack_bytes: u64,
}

impl RefUpdateOutcome {
    /// Whether every requested ref was written.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

struct DelegateProgress<'a, D: ?Sized>(&'a mut D);

impl<D: FetchDelegate + ?Sized> ProgressSink for DelegateProgress<'_, D> {
    fn info(&mut self, message: &[u8]) {
        self.0.progress(message);
    }
}

/// Performs the advertisement phase only.
pub fn ls<T: Transport + ?Sized>(transport: &mut T) -> Result<Advertisement> {
    transport.set_phase(Phase::Advertisement);
    transport.request_advertisement(Service::UploadPack)?;
    let advertisement = {
        let mut frames = Reader::new(transport.reply()?);
        advert::parse(&mut frames).map_err(|err| Error::attribute(err, Phase::Advertisement))?
    };
    transport.close()?;
    tracing::debug!(refs = advertisement.refs.len(), "listed remote refs");
    Ok(advertisement)
}

/// Runs one full fetch conversation: advertisement, want selection,
/// negotiation, pack ingestion.
pub fn fetch<T, S, D, N>(
    transport: &mut T,
    store: &mut S,
    delegate: &mut D,
    negotiator: &mut N,
    options: &FetchOptions,
) -> Result<FetchOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
    D: FetchDelegate + ?Sized,
    N: Negotiator + ?Sized,
{
    transport.set_phase(Phase::Advertisement);
    transport.request_advertisement(Service::UploadPack)?;
    let advertisement = {
        let mut frames = Reader::new(transport.reply()?);
        advert::parse(&mut frames).map_err(|err| Error::attribute(err, Phase::Advertisement))?
    };
    tracing::debug!(
        refs = advertisement.refs.len(),
        caps = %advertisement.capabilities.render(),
        "parsed advertisement"
    );

    let requested = delegate.want(&advertisement.refs, &advertisement.capabilities)?;
    if requested.is_empty() {
        transport.close()?;
        return Ok(FetchOutcome::default());
    }
    validate_wants(&requested, &advertisement)?;

    // Every requested id goes on the wire; trimming redundant transfer is
    // the have-negotiation's job. Holding the tip object proves nothing
    // about its graph being whole, so local presence must not drop a want.
    let mut wants = Vec::with_capacity(requested.len());
    for id in &requested {
        if !wants.contains(id) {
            wants.push(*id);
        }
    }
    let refs = requested_refs(&advertisement, &requested);

    let capabilities = request_capabilities(&advertisement.capabilities, options)?;
    let side_band = SideBandMode::from_caps(&capabilities);
    let session = Session {
        wants: &wants,
        cap_suffix: capabilities.render(),
        shallow: &options.shallow,
        deepen: options.deepen.as_ref(),
    };
    {
        let mut notify = |update: ShallowUpdate| delegate.notify(update);
        engine::run(
            transport,
            &session,
            negotiator,
            &options.interrupt,
            &mut notify,
        )?;
    }

    let stats = {
        let reply = transport.reply()?;
        match side_band {
            SideBandMode::None => {
                let mut progress = DelegateProgress(&mut *delegate);
                pack::ingest(reply, store, &options.pack, &options.interrupt, &mut progress)?
            }
            SideBandMode::Basic | SideBandMode::SideBand64k => {
                let mut frames = Reader::new(reply);
                let mut progress = DelegateProgress(&mut *delegate);
                let mut demux = Demux::new(&mut frames, &mut progress);
                pack::ingest(
                    &mut demux,
                    store,
                    &options.pack,
                    &options.interrupt,
                    &mut Discard,
                )?
            }
        }
    };
    transport.close()?;

    let (objects, pack_bytes) = match stats {
        Some(stats) => (stats.objects, stats.bytes),
        None => (0, 0),
    };
    tracing::debug!(objects, pack_bytes, "fetch complete");
    Ok(FetchOutcome {
        refs,
        pack_bytes,
        objects,
    })
}

/// Fetches one ref by name and updates it locally.
pub fn fetch_one<T, S>(
    transport: &mut T,
    store: &mut S,
    name: &BStr,
    options: &FetchOptions,
    progress: &mut dyn ProgressSink,
) -> Result<RefUpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    let names = [name.to_owned()];
    fetch_refs(transport, store, Some(&names), options, progress)
}

/// Fetches the given refs by name and updates them locally.
pub fn fetch_some<T, S>(
    transport: &mut T,
    store: &mut S,
    names: &[BString],
    options: &FetchOptions,
    progress: &mut dyn ProgressSink,
) -> Result<RefUpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    fetch_refs(transport, store, Some(names), options, progress)
}

/// Fetches every advertised ref and updates the local ones to match.
pub fn fetch_all<T, S>(
    transport: &mut T,
    store: &mut S,
    options: &FetchOptions,
    progress: &mut dyn ProgressSink,
) -> Result<RefUpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    fetch_refs(transport, store, None, options, progress)
}

/// Clones: fetches everything into a (typically empty) store and creates the
/// advertised refs.
pub fn clone<T, S>(
    transport: &mut T,
    store: &mut S,
    options: &FetchOptions,
    progress: &mut dyn ProgressSink,
) -> Result<RefUpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    fetch_all(transport, store, options, progress)
}

/// Shared machinery of the ref-updating conveniences.
fn fetch_refs<T, S>(
    transport: &mut T,
    store: &mut S,
    names: Option<&[BString]>,
    options: &FetchOptions,
    progress: &mut dyn ProgressSink,
) -> Result<RefUpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    struct Select<'a> {
        names: Option<&'a [BString]>,
        chosen: Vec<(BString, ObjectId)>,
        progress: &'a mut dyn ProgressSink,
    }

    impl FetchDelegate for Select<'_> {
        fn progress(&mut self, message: &[u8]) {
            self.progress.info(message);
        }

        fn want(
            &mut self,
            refs: &[Advertised],
            _capabilities: &CapabilitySet,
        ) -> Result<Vec<ObjectId>> {
            match self.names {
                None => {
                    self.chosen = refs
                        .iter()
                        .filter(|r| !r.peeled)
                        .map(|r| (r.name.clone(), r.target))
                        .collect();
                }
                Some(names) => {
                    for name in names {
                        let found = refs
                            .iter()
                            .find(|r| !r.peeled && r.name == *name)
                            .ok_or_else(|| Error::UnknownRef(name.clone()))?;
                        self.chosen.push((found.name.clone(), found.target));
                    }
                }
            }
            let mut wants: Vec<ObjectId> =
                self.chosen.iter().map(|(_, id)| *id).collect();
            wants.sort_unstable();
            wants.dedup();
            Ok(wants)
        }
    }

    let tips: Vec<ObjectId> = store
        .list_refs()
        .map_err(git_wire_core::Error::Store)?
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    let mut negotiator = ConsecutiveWalk::new(store, tips);
    let mut select = Select {
        names,
        chosen: Vec::new(),
        progress,
    };
    let outcome = fetch(transport, store, &mut select, &mut negotiator, options)?;

    let mut updated = Vec::new();
    let mut pending = Vec::new();
    let mut failure: Option<StoreError> = None;
    let mut verified = HashSet::new();
    for (name, id) in select.chosen {
        if failure.is_some() {
            pending.push((name, id));
            continue;
        }
        // A ref may only move to an id whose whole graph is in the store; a
        // torn or partially delivered history must not become a ref target.
        match graph_complete(store, &id, &mut verified) {
            Ok(true) => {}
            Ok(false) => {
                failure = Some(format!("object graph at {id} is incomplete").into());
                pending.push((name, id));
                continue;
            }
            Err(err) => {
                failure = Some(err);
                pending.push((name, id));
                continue;
            }
        }
        match store.write_ref(name.as_bstr(), id) {
            Ok(()) => updated.push((name, id)),
            Err(err) => {
                failure = Some(err);
                pending.push((name, id));
            }
        }
    }
    Ok(RefUpdateOutcome {
        updated,
        pending,
        failure,
        pack_bytes: outcome.pack_bytes,
    })
}

/// Whether the graph rooted at `root` is entirely present in the store.
///
/// A missing parent commit is treated as a history boundary: the store
/// capability records no shallow set, so an absent parent is
/// indistinguishable from a shallow cutoff. A missing tree, blob or tag
/// target means the graph is torn, for instance by a fetch interrupted
/// after some objects were written, and the id must not become a ref
/// target. `verified` memoizes objects already walked, shared across the
/// roots of one update batch.
fn graph_complete<S: ObjectStore + ?Sized>(
    store: &S,
    root: &ObjectId,
    verified: &mut HashSet<ObjectId>,
) -> git_wire_core::store::StoreResult<bool> {
    if !store.has_object(root)? {
        return Ok(false);
    }
    let mut queue = vec![*root];
    while let Some(id) = queue.pop() {
        if !verified.insert(id) {
            continue;
        }
        let object = store.read_object(&id)?;
        let parents: HashSet<ObjectId> = match object.kind {
            ObjectKind::Commit => commit_parents(&object.data).into_iter().collect(),
            _ => HashSet::new(),
        };
        for (child, _) in referenced_ids(object.kind, &object.data) {
            if verified.contains(&child) {
                continue;
            }
            if store.has_object(&child)? {
                queue.push(child);
            } else if !parents.contains(&child) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// The advertised `(name, id)` pairs covered by the request.
fn requested_refs(
    advertisement: &Advertisement,
    requested: &[ObjectId],
) -> Vec<(BString, ObjectId)> {
    advertisement
        .refs
        .iter()
        .filter(|r| !r.peeled && requested.contains(&r.target))
        .map(|r| (r.name.clone(), r.target))
        .collect()
}

/// Every want must be advertised unless the server allows unadvertised
/// wants.
fn validate_wants(wants: &[ObjectId], advertisement: &Advertisement) -> Result<()> {
    let caps = &advertisement.capabilities;
    if caps.contains("allow-tip-sha1-in-want") || caps.contains("allow-reachable-sha1-in-want") {
        return Ok(());
    }
    for want in wants {
        if !advertisement.mentions(want) {
            return Err(Error::WantNotAdvertised(*want));
        }
    }
    Ok(())
}

/// Assembles the capabilities to assert for this conversation.
fn request_capabilities(
    advertised: &CapabilitySet,
    options: &FetchOptions,
) -> Result<CapabilitySet> {
    let mut requested = Vec::new();
    match advertised.multi_ack_mode() {
        MultiAckMode::Detailed => {
            requested.push(Capability::MultiAckDetailed);
            if advertised.contains("no-done") {
                requested.push(Capability::NoDone);
            }
        }
        MultiAckMode::Basic => requested.push(Capability::MultiAck),
        MultiAckMode::None => {}
    }
    if let Some(side_band) = advertised.side_band_choice() {
        requested.push(side_band);
    }
    if advertised.contains("ofs-delta") {
        requested.push(Capability::OfsDelta);
    }
    if options.thin && advertised.contains("thin-pack") {
        requested.push(Capability::ThinPack);
    }
    if options.include_tag && advertised.contains("include-tag") {
        requested.push(Capability::IncludeTag);
    }
    if options.no_progress && advertised.contains("no-progress") {
        requested.push(Capability::NoProgress);
    }
    if options.deepen.is_some() || !options.shallow.is_empty() {
        if !advertised.contains("shallow") {
            return Err(Error::Core(git_wire_core::Error::UnknownCapabilityAsserted(
                "shallow".into(),
            )));
        }
        requested.push(Capability::Shallow);
    }
    match options.deepen {
        Some(DeepenSpec::Since(_)) if !advertised.contains("deepen-since") => {
            return Err(Error::Core(git_wire_core::Error::UnknownCapabilityAsserted(
                "deepen-since".into(),
            )));
        }
        Some(DeepenSpec::Not(_)) if !advertised.contains("deepen-not") => {
            return Err(Error::Core(git_wire_core::Error::UnknownCapabilityAsserted(
                "deepen-not".into(),
            )));
        }
        _ => {}
    }
    if advertised.contains("agent") {
        requested.push(Capability::Agent(AGENT.into()));
    }
    advertised.effective(&requested).map_err(Error::Core)
}
