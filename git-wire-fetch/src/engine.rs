//! The want/have negotiation engine.
//!
//! Drives rounds against either transport shape. On a stateless transport
//! the server forgets everything between requests, so every round re-sends
//! the full want block and every `have` offered so far; on a persistent
//! stream the want block goes out once and rounds only carry new haves.

use std::io::Write;

use bstr::BString;

use git_wire_core::interrupt::Interrupt;
use git_wire_core::pktline::{PacketLine, Reader, Writer};
use git_wire_core::transport::{Phase, Service, Transport};
use git_wire_core::ObjectId;

use crate::negotiate::{Ack, AckKind, Acks, DeepenSpec, Negotiator, Round, ShallowUpdate};
use crate::{Error, Result};

/// Safeguard against a negotiation that never converges.
pub(crate) const MAX_ROUNDS: usize = 256;

/// The static inputs of one fetch negotiation.
pub(crate) struct Session<'a> {
    /// Objects to request, first one carrying the capability suffix.
    pub wants: &'a [ObjectId],
    /// Rendered effective capabilities for the first want line.
    pub cap_suffix: BString,
    /// The client's current shallow boundary, sent as `shallow` lines.
    pub shallow: &'a [ObjectId],
    /// The deepening request, if any.
    pub deepen: Option<&'a DeepenSpec>,
}

impl Session<'_> {
    /// Writes the want block: wants, shallows, deepen, flush.
    fn write_want_block<W: Write>(&self, frames: &mut Writer<W>) -> Result<()> {
        for (index, want) in self.wants.iter().enumerate() {
            let mut line = BString::from(format!("want {}", want.to_hex()));
            if index == 0 && !self.cap_suffix.is_empty() {
                line.push(b' ');
                line.extend_from_slice(&self.cap_suffix);
            }
            frames.write_text(&line)?;
        }
        for shallow in self.shallow {
            frames.write_text(format!("shallow {}", shallow.to_hex()).as_bytes())?;
        }
        if let Some(deepen) = self.deepen {
            let line = match deepen {
                DeepenSpec::Depth(depth) => format!("deepen {depth}"),
                DeepenSpec::Since(timestamp) => format!("deepen-since {timestamp}"),
                DeepenSpec::Not(name) => format!("deepen-not {name}"),
            };
            frames.write_text(line.as_bytes())?;
        }
        frames.write_flush()?;
        Ok(())
    }
}

/// How a server's ack block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockEnd {
    /// `NAK`: nothing final yet, another round may follow.
    Nak,
    /// A bare `ACK <id>`: the pack follows immediately.
    FinalAck,
    /// The reply ended without a terminator; nothing more is coming.
    Exhausted,
}

/// Runs the negotiation to completion. Afterwards the transport's reply is
/// positioned at the start of the pack (or at end of stream when the server
/// had nothing to send). `notify` is invoked at most once, with the shallow
/// boundary update of a deepening fetch.
pub(crate) fn run<T, N>(
    transport: &mut T,
    session: &Session<'_>,
    negotiator: &mut N,
    interrupt: &Interrupt,
    notify: &mut dyn FnMut(ShallowUpdate),
) -> Result<()>
where
    T: Transport + ?Sized,
    N: Negotiator + ?Sized,
{
    transport.set_phase(Phase::Negotiation);
    let stateless = transport.stateless();
    let mut notified = false;

    if !stateless {
        let mut raw = Vec::new();
        session.write_want_block(&mut Writer::new(&mut raw))?;
        transport.send(Service::UploadPack, &mut raw.as_slice())?;
        if session.deepen.is_some() {
            let mut frames = Reader::new(transport.reply()?);
            let update = read_shallow_block(&mut frames)?;
            notify(update);
            notified = true;
        }
    }

    let mut acks = Acks::default();
    let mut sent_haves: Vec<ObjectId> = Vec::new();
    let mut rounds = 0usize;

    loop {
        interrupt.check().map_err(Error::Core)?;
        rounds += 1;
        if rounds > MAX_ROUNDS {
            return Err(Error::NegotiationStalled);
        }

        let (haves, conclude) = match negotiator.next(&acks) {
            Round::Again(haves) if !haves.is_empty() && !acks.ready() => (haves, false),
            _ => (Vec::new(), true),
        };
        tracing::trace!(round = rounds, haves = haves.len(), conclude, "negotiation round");

        let mut raw = Vec::new();
        {
            let mut frames = Writer::new(&mut raw);
            if stateless {
                session.write_want_block(&mut frames)?;
                for have in &sent_haves {
                    frames.write_text(format!("have {}", have.to_hex()).as_bytes())?;
                }
            }
            for have in &haves {
                frames.write_text(format!("have {}", have.to_hex()).as_bytes())?;
            }
            if conclude {
                frames.write_text(b"done")?;
            } else {
                frames.write_flush()?;
            }
        }
        sent_haves.extend_from_slice(&haves);
        transport.send(Service::UploadPack, &mut raw.as_slice())?;

        let mut block = Acks::default();
        let end = {
            let mut frames = Reader::new(transport.reply()?);
            read_ack_block(&mut frames, &mut block)?
        };
        if !notified
            && (session.deepen.is_some()
                || !block.shallow.is_empty()
                || !block.unshallow.is_empty())
        {
            notify(ShallowUpdate {
                shallow: block.shallow.clone(),
                unshallow: block.unshallow.clone(),
            });
            notified = true;
        }
        acks = block;

        // `done` sent, a final ACK consumed, or the reply ran dry: the
        // conversation is past its have phase either way.
        if conclude || end != BlockEnd::Nak {
            break;
        }
    }

    transport.set_phase(Phase::PackReceive);
    Ok(())
}

/// Reads the `shallow`/`unshallow` reply of a deepening request on a
/// persistent stream, up to its flush.
fn read_shallow_block<R: std::io::Read>(frames: &mut Reader<R>) -> Result<ShallowUpdate> {
    let mut update = ShallowUpdate::default();
    for line in frames
        .read_until_flush()
        .map_err(|err| Error::attribute(err, Phase::Negotiation))?
    {
        let Some(text) = line.as_text() else {
            return Err(Error::Core(git_wire_core::Error::MalformedFrame(
                "unexpected sentinel in shallow block".into(),
            )));
        };
        if let Some(rest) = text.strip_prefix(b"shallow ") {
            update.shallow.push(ObjectId::from_hex(rest).map_err(Error::Core)?);
        } else if let Some(rest) = text.strip_prefix(b"unshallow ") {
            update
                .unshallow
                .push(ObjectId::from_hex(rest).map_err(Error::Core)?);
        } else {
            return Err(Error::Core(git_wire_core::Error::MalformedFrame(format!(
                "unexpected line in shallow block: {}",
                String::from_utf8_lossy(text)
            ))));
        }
    }
    Ok(update)
}

/// Reads one ack block: `shallow`/`unshallow` notices and `ACK`/`NAK` lines,
/// stopping after the block's terminator.
fn read_ack_block<R: std::io::Read>(
    frames: &mut Reader<R>,
    block: &mut Acks,
) -> Result<BlockEnd> {
    loop {
        let line = match frames
            .read_line()
            .map_err(|err| Error::attribute(err, Phase::Negotiation))?
        {
            None => return Ok(BlockEnd::Exhausted),
            // A stateless deepening reply separates its shallow section from
            // the acks with a flush.
            Some(PacketLine::Flush) => continue,
            Some(PacketLine::Data(data)) => data,
            Some(_) => {
                return Err(Error::Core(git_wire_core::Error::MalformedFrame(
                    "unexpected sentinel in negotiation reply".into(),
                )))
            }
        };
        let text = line.strip_suffix(b"\n").unwrap_or(&line);

        if let Some(message) = text.strip_prefix(b"ERR ") {
            return Err(Error::Core(git_wire_core::Error::Remote(message.into())));
        }
        if let Some(rest) = text.strip_prefix(b"shallow ") {
            block.shallow.push(ObjectId::from_hex(rest).map_err(Error::Core)?);
            continue;
        }
        if let Some(rest) = text.strip_prefix(b"unshallow ") {
            block
                .unshallow
                .push(ObjectId::from_hex(rest).map_err(Error::Core)?);
            continue;
        }
        if text == b"NAK" {
            return Ok(BlockEnd::Nak);
        }
        if let Some(rest) = text.strip_prefix(b"ACK ") {
            let (hex, status) = match rest.iter().position(|&b| b == b' ') {
                Some(space) => (&rest[..space], Some(&rest[space + 1..])),
                None => (rest, None),
            };
            let id = ObjectId::from_hex(hex).map_err(Error::Core)?;
            let kind = match status {
                None => AckKind::Ack,
                Some(b"common") => AckKind::Common,
                Some(b"ready") => AckKind::Ready,
                Some(b"continue") => AckKind::Continue,
                Some(other) => {
                    return Err(Error::Core(git_wire_core::Error::MalformedFrame(format!(
                        "unknown ACK status {}",
                        String::from_utf8_lossy(other)
                    ))))
                }
            };
            block.acks.push(Ack { id, kind });
            if kind == AckKind::Ack {
                return Ok(BlockEnd::FinalAck);
            }
            continue;
        }
        return Err(Error::Core(git_wire_core::Error::MalformedFrame(format!(
            "unexpected negotiation line: {}",
            String::from_utf8_lossy(text)
        ))));
    }
}
