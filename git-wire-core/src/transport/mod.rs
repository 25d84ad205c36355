//! The transport adapter.
//!
//! One logical protocol conversation maps onto either a persistent
//! bidirectional byte stream or a sequence of stateless HTTP exchanges. The
//! engines speak to [`Transport`] and never learn which one they got, beyond
//! the [`Transport::stateless`] flag that changes how much negotiation state
//! must be re-sent each round.

use std::io::{BufRead, Read};
use std::time::Duration;

use crate::Result;

pub mod http;
pub mod stream;
pub mod tcp;

pub use http::{HttpReply, HttpTransport, Requester};
pub use stream::{PhasedStream, StreamTransport};

/// Which server-side service the conversation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `git-upload-pack`: the fetch/clone direction.
    UploadPack,
    /// `git-receive-pack`: the push direction.
    ReceivePack,
}

impl Service {
    /// The service name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }
}

/// The protocol phase currently in flight, used to select a timeout and to
/// attribute timeout failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading the initial ref advertisement.
    Advertisement,
    /// One want/have negotiation round.
    Negotiation,
    /// Receiving a packfile.
    PackReceive,
    /// Transmitting a packfile.
    PackSend,
}

/// Per-phase deadlines. `None` disables the deadline for that phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    /// Deadline for the advertisement exchange.
    pub advertisement: Option<Duration>,
    /// Deadline for each negotiation round.
    pub negotiation_round: Option<Duration>,
    /// Deadline for receiving the pack.
    pub pack_receive: Option<Duration>,
    /// Deadline for sending the pack.
    pub pack_send: Option<Duration>,
}

impl Timeouts {
    /// The deadline configured for `phase`.
    pub fn for_phase(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Advertisement => self.advertisement,
            Phase::Negotiation => self.negotiation_round,
            Phase::PackReceive => self.pack_receive,
            Phase::PackSend => self.pack_send,
        }
    }
}

/// A transport carries one conversation with one remote repository.
///
/// The calling convention is strictly request-then-reply:
/// `request_advertisement` or `send` issues one client-to-server phase, and
/// `reply` exposes the server's answer. The transport owns the reply stream;
/// the reader handed out by `reply` only borrows it, so dropping the reader
/// loses nothing and a later `reply` call continues exactly where the
/// previous reader stopped. Dropping the transport releases the connection;
/// `close` does so while surfacing shutdown failures.
pub trait Transport {
    /// Whether the server forgets all conversation state between `send`
    /// calls, as stateless HTTP does.
    fn stateless(&self) -> bool;

    /// Requests the ref advertisement for `service`. The advertisement
    /// pkt-lines are read through `reply`.
    fn request_advertisement(&mut self, service: Service) -> Result<()>;

    /// Sends one phase body.
    fn send(&mut self, service: Service, body: &mut dyn Read) -> Result<()>;

    /// The server's reply to the most recent request.
    fn reply(&mut self) -> Result<Box<dyn BufRead + '_>>;

    /// Announces the phase the next I/O belongs to so its deadline can be
    /// armed.
    fn set_phase(&mut self, phase: Phase);

    /// Shuts the conversation down.
    fn close(&mut self) -> Result<()>;
}
