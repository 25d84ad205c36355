//! The user-visible push operations.

use std::collections::HashSet;

use bstr::BString;

use git_wire_core::advert::{self, Advertised, Advertisement};
use git_wire_core::capability::{Capability, CapabilitySet};
use git_wire_core::interrupt::Interrupt;
use git_wire_core::object::referenced_ids;
use git_wire_core::pktline::Reader;
use git_wire_core::progress::ProgressSink;
use git_wire_core::sideband::{Demux, SideBandMode};
use git_wire_core::store::ObjectStore;
use git_wire_core::transport::{Phase, Service, Transport};
use git_wire_core::ObjectId;

use crate::commands::Command;
use crate::pack::{write_pack, ObjectRef, WriterConfig};
use crate::report::{parse_report, PushOutcome};
use crate::{Error, Result};

/// Agent string asserted when the server advertises `agent`.
const AGENT: &str = concat!("git-wire/", env!("CARGO_PKG_VERSION"));

/// Callbacks one push conversation consults.
pub trait PushDelegate {
    /// Chooses what to push, given the advertisement: extra `have` roots for
    /// pack exclusion, plus the ref commands. Returning no commands ends the
    /// conversation without sending anything.
    fn push(
        &mut self,
        refs: &[Advertised],
        capabilities: &CapabilitySet,
    ) -> Result<(Vec<ObjectId>, Vec<Command>)>;

    /// Receives the server's side-band progress text.
    fn progress(&mut self, _message: &[u8]) {}
}

/// Options shaping one push.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Ask the server to apply all commands atomically.
    pub atomic: bool,
    /// Ask the server to suppress its own progress output.
    pub quiet: bool,
    /// Push options forwarded to the server's hooks, one line each.
    pub push_options: Vec<BString>,
    /// Allow the pack to reference server-side objects as delta bases.
    pub thin: bool,
    /// Delta window size for pack generation.
    pub window: usize,
    /// Maximum delta chain depth for pack generation.
    pub max_delta_depth: usize,
    /// Cancellation flag checked at every suspension point.
    pub interrupt: Interrupt,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            atomic: false,
            quiet: false,
            push_options: Vec::new(),
            thin: true,
            window: 10,
            max_delta_depth: 50,
            interrupt: Interrupt::new(),
        }
    }
}

/// The result of [`update_and_create`].
#[derive(Debug)]
pub struct UpdateOutcome {
    /// The server's report for the commands that were sent.
    pub report: PushOutcome,
    /// Refs skipped because the server's current tip is unknown locally;
    /// the client is out of date and must fetch first.
    pub skipped: Vec<BString>,
}

struct DelegateProgress<'a, D: ?Sized>(&'a mut D);

impl<D: PushDelegate + ?Sized> ProgressSink for DelegateProgress<'_, D> {
    fn info(&mut self, message: &[u8]) {
        self.0.progress(message);
    }
}

/// Runs one full push conversation: advertisement, command selection, pack
/// transmission, report-status.
pub fn push<T, S, D>(
    transport: &mut T,
    store: &S,
    delegate: &mut D,
    options: &PushOptions,
) -> Result<PushOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
    D: PushDelegate + ?Sized,
{
    transport.set_phase(Phase::Advertisement);
    transport.request_advertisement(Service::ReceivePack)?;
    let advertisement = {
        let mut frames = Reader::new(transport.reply()?);
        advert::parse(&mut frames).map_err(|err| Error::attribute(err, Phase::Advertisement))?
    };
    tracing::debug!(refs = advertisement.refs.len(), "parsed receive-pack advertisement");

    let (haves, commands) = delegate.push(&advertisement.refs, &advertisement.capabilities)?;
    if commands.is_empty() {
        transport.close()?;
        return Ok(PushOutcome::default());
    }
    if commands.iter().any(Command::is_delete)
        && !advertisement.capabilities.contains("delete-refs")
    {
        return Err(Error::DeleteUnsupported);
    }
    if !options.push_options.is_empty()
        && !advertisement.capabilities.contains("push-options")
    {
        return Err(Error::PushOptionsUnsupported);
    }

    let effective = request_capabilities(&advertisement.capabilities, &commands, options)?;
    let side_band = SideBandMode::from_caps(&effective);
    let report_status = effective.contains("report-status");

    transport.set_phase(Phase::PackSend);
    options.interrupt.check().map_err(Error::Core)?;

    let mut body = Vec::new();
    {
        let mut frames = git_wire_core::pktline::Writer::new(&mut body);
        for (index, command) in commands.iter().enumerate() {
            let mut line = command.line();
            if index == 0 {
                line.push(0);
                line.extend_from_slice(&effective.render());
            }
            frames.write_text(&line)?;
        }
        frames.write_flush()?;
        if !options.push_options.is_empty() {
            for option in &options.push_options {
                frames.write_text(option)?;
            }
            frames.write_flush()?;
        }
    }

    if commands.iter().any(|command| !command.is_delete()) {
        let plan = plan_objects(store, &commands, &haves, &advertisement, &options.interrupt)?;
        let config = WriterConfig {
            window: options.window,
            max_delta_depth: options.max_delta_depth,
            ofs_delta: effective.contains("ofs-delta"),
            thin: options.thin,
        };
        let mut progress = DelegateProgress(&mut *delegate);
        write_pack(
            store,
            &plan.objects,
            &plan.seeds,
            &config,
            &mut body,
            &mut progress,
        )?;
    }
    transport.send(Service::ReceivePack, &mut body.as_slice())?;

    let outcome = if report_status {
        let reply = transport.reply()?;
        match side_band {
            SideBandMode::None => parse_report(&mut Reader::new(reply))?,
            SideBandMode::Basic | SideBandMode::SideBand64k => {
                let mut frames = Reader::new(reply);
                let mut progress = DelegateProgress(&mut *delegate);
                let mut demux = Demux::new(&mut frames, &mut progress);
                parse_report(&mut Reader::new(&mut demux))?
            }
        }
    } else {
        PushOutcome::default()
    };
    transport.close()?;
    tracing::debug!(success = outcome.is_success(), "push complete");
    Ok(outcome)
}

/// Pushes local refs, creating what the server lacks and fast-forwarding
/// what it has. Refs whose server-side tip is missing locally are skipped
/// and reported, never force-pushed.
pub fn update_and_create<T, S>(
    transport: &mut T,
    store: &S,
    names: Option<&[BString]>,
    options: &PushOptions,
    progress: &mut dyn ProgressSink,
) -> Result<UpdateOutcome>
where
    T: Transport + ?Sized,
    S: ObjectStore + ?Sized,
{
    struct Planner<'a, S: ?Sized> {
        store: &'a S,
        names: Option<&'a [BString]>,
        skipped: Vec<BString>,
        progress: &'a mut dyn ProgressSink,
    }

    impl<S: ObjectStore + ?Sized> PushDelegate for Planner<'_, S> {
        fn progress(&mut self, message: &[u8]) {
            self.progress.info(message);
        }

        fn push(
            &mut self,
            refs: &[Advertised],
            _capabilities: &CapabilitySet,
        ) -> Result<(Vec<ObjectId>, Vec<Command>)> {
            let local = self
                .store
                .list_refs()
                .map_err(git_wire_core::Error::Store)?;
            let mut commands = Vec::new();
            for (name, local_id) in local {
                if let Some(names) = self.names {
                    if !names.contains(&name) {
                        continue;
                    }
                }
                match refs.iter().find(|r| !r.peeled && r.name == name) {
                    None => commands.push(Command::Create {
                        new: local_id,
                        name,
                    }),
                    Some(remote) if remote.target == local_id => {}
                    Some(remote) => {
                        let old_known = self
                            .store
                            .has_object(&remote.target)
                            .map_err(git_wire_core::Error::Store)?;
                        if old_known {
                            commands.push(Command::Update {
                                old: remote.target,
                                new: local_id,
                                name,
                            });
                        } else {
                            self.skipped.push(name);
                        }
                    }
                }
            }
            Ok((Vec::new(), commands))
        }
    }

    let mut planner = Planner {
        store,
        names,
        skipped: Vec::new(),
        progress,
    };
    let report = push(transport, store, &mut planner, options)?;
    Ok(UpdateOutcome {
        report,
        skipped: planner.skipped,
    })
}

/// The objects to pack and the thin-pack seed bases.
struct Plan {
    objects: Vec<ObjectRef>,
    seeds: Vec<ObjectRef>,
}

/// Collects everything reachable from the new tips but not from the
/// server's known refs or the caller's extra haves, with path hints for
/// delta clustering.
fn plan_objects<S: ObjectStore + ?Sized>(
    store: &S,
    commands: &[Command],
    haves: &[ObjectId],
    advertisement: &Advertisement,
    interrupt: &Interrupt,
) -> Result<Plan> {
    let mut frontier: Vec<ObjectId> = haves.to_vec();
    frontier.extend(
        advertisement
            .refs
            .iter()
            .map(|r| r.target),
    );
    frontier.sort_unstable();
    frontier.dedup();
    let exclude: HashSet<ObjectId> = store
        .reachable_from(&frontier)
        .map_err(git_wire_core::Error::Store)?
        .collect();

    let mut objects = Vec::new();
    let mut seen = HashSet::new();
    let mut queue: Vec<(ObjectId, u32)> = commands
        .iter()
        .map(|command| command.new())
        .filter(|id| !id.is_null())
        .map(|id| (id, 0))
        .collect();

    while let Some((id, path_hash)) = queue.pop() {
        interrupt.check().map_err(Error::Core)?;
        if exclude.contains(&id) || !seen.insert(id) {
            continue;
        }
        let object = store.read_object(&id).map_err(|_| Error::MissingObject(id))?;
        objects.push(ObjectRef {
            id,
            kind: object.kind,
            size: object.data.len(),
            path_hash,
        });
        for (child, name) in referenced_ids(object.kind, &object.data) {
            let child_hash = name.map(|n| fnv32(&n)).unwrap_or(path_hash);
            queue.push((child, child_hash));
        }
    }

    // Seed candidates for thin deltas: the frontier objects we hold locally,
    // plus one level of their children.
    let mut seeds = Vec::new();
    let mut seed_seen = HashSet::new();
    for root in &frontier {
        let Ok(object) = store.read_object(root) else {
            continue;
        };
        let children = referenced_ids(object.kind, &object.data);
        if seed_seen.insert(*root) && !seen.contains(root) {
            seeds.push(ObjectRef {
                id: *root,
                kind: object.kind,
                size: object.data.len(),
                path_hash: 0,
            });
        }
        for (child, name) in children {
            if seen.contains(&child) || !seed_seen.insert(child) {
                continue;
            }
            let Ok(child_object) = store.read_object(&child) else {
                continue;
            };
            seeds.push(ObjectRef {
                id: child,
                kind: child_object.kind,
                size: child_object.data.len(),
                path_hash: name.map(|n| fnv32(&n)).unwrap_or(0),
            });
        }
    }

    tracing::debug!(
        objects = objects.len(),
        seeds = seeds.len(),
        excluded = exclude.len(),
        "planned push pack"
    );
    Ok(Plan { objects, seeds })
}

/// FNV-1a over a path component, clustering same-named files for deltas.
fn fnv32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811c_9dc5u32;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Assembles the capabilities to assert for this conversation.
fn request_capabilities(
    advertised: &CapabilitySet,
    commands: &[Command],
    options: &PushOptions,
) -> Result<CapabilitySet> {
    let mut requested = Vec::new();
    if advertised.contains("report-status") {
        requested.push(Capability::ReportStatus);
    }
    if let Some(side_band) = advertised.side_band_choice() {
        requested.push(side_band);
    }
    if advertised.contains("ofs-delta") {
        requested.push(Capability::OfsDelta);
    }
    if commands.iter().any(Command::is_delete) {
        requested.push(Capability::DeleteRefs);
    }
    if options.atomic {
        if !advertised.contains("atomic") {
            return Err(Error::Core(
                git_wire_core::Error::UnknownCapabilityAsserted("atomic".into()),
            ));
        }
        requested.push(Capability::Atomic);
    }
    if options.quiet && advertised.contains("quiet") {
        requested.push(Capability::Quiet);
    }
    if !options.push_options.is_empty() {
        requested.push(Capability::PushOptions);
    }
    if advertised.contains("agent") {
        requested.push(Capability::Agent(AGENT.into()));
    }
    advertised.effective(&requested).map_err(Error::Core)
}
