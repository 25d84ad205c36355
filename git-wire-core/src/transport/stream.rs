//! The persistent transport: one bidirectional byte stream for the whole
//! conversation, as used by `git://` daemons and spawned remote helpers.

use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

use crate::pktline;
use crate::transport::{Phase, Service, Timeouts, Transport};
use crate::Result;

/// A byte stream that can optionally arm an I/O deadline. The default
/// implementation ignores deadlines, which is right for pipes and in-memory
/// test streams; sockets override it.
pub trait PhasedStream: Read + Write {
    /// Arms (or clears, with `None`) the stream's read/write deadline.
    fn arm_deadline(&mut self, _deadline: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }
}

/// Connection details for the git-daemon request line sent ahead of the
/// advertisement on `git://` connections.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    /// Host name for the `host=` parameter.
    pub host: String,
    /// Port the connection targets.
    pub port: u16,
    /// Repository path on the server.
    pub path: String,
    /// Whether to request protocol version 1 explicitly via the daemon
    /// request's extra parameters (`GIT_PROTOCOL=version=1`).
    pub version1: bool,
}

impl DaemonInfo {
    fn request_line(&self, service: Service) -> Vec<u8> {
        let mut line = Vec::new();
        line.extend_from_slice(service.name().as_bytes());
        line.push(b' ');
        line.extend_from_slice(self.path.as_bytes());
        line.push(0);
        line.extend_from_slice(format!("host={}:{}", self.host, self.port).as_bytes());
        line.push(0);
        if self.version1 {
            line.push(0);
            line.extend_from_slice(b"version=1");
            line.push(0);
        }
        line
    }
}

/// A [`Transport`] over a single persistent byte stream.
pub struct StreamTransport<S: PhasedStream> {
    stream: BufReader<S>,
    daemon: Option<DaemonInfo>,
    timeouts: Timeouts,
    phase: Phase,
}

impl<S: PhasedStream> StreamTransport<S> {
    /// Wraps an already-connected stream that needs no daemon request line,
    /// such as a spawned process or a test fixture.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            daemon: None,
            timeouts: Timeouts::default(),
            phase: Phase::Advertisement,
        }
    }

    /// Wraps a freshly-dialed `git://` connection; the daemon request line is
    /// written when the advertisement is requested.
    pub fn with_daemon(stream: S, daemon: DaemonInfo) -> Self {
        Self {
            stream: BufReader::new(stream),
            daemon: Some(daemon),
            timeouts: Timeouts::default(),
            phase: Phase::Advertisement,
        }
    }

    /// Sets the per-phase deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn arm_current_deadline(&mut self) -> Result<()> {
        let deadline = self.timeouts.for_phase(self.phase);
        self.stream.get_mut().arm_deadline(deadline)?;
        Ok(())
    }

    /// Consumes the transport, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

impl<S: PhasedStream> Transport for StreamTransport<S> {
    fn stateless(&self) -> bool {
        false
    }

    fn request_advertisement(&mut self, service: Service) -> Result<()> {
        self.arm_current_deadline()?;
        if let Some(daemon) = self.daemon.take() {
            let raw = self.stream.get_mut();
            let mut frames = pktline::Writer::new(&mut *raw);
            frames.write_data(&daemon.request_line(service))?;
            raw.flush()?;
        }
        Ok(())
    }

    fn send(&mut self, _service: Service, body: &mut dyn Read) -> Result<()> {
        self.arm_current_deadline()?;
        let raw = self.stream.get_mut();
        std::io::copy(body, raw)?;
        raw.flush()?;
        Ok(())
    }

    fn reply(&mut self) -> Result<Box<dyn BufRead + '_>> {
        self.arm_current_deadline()?;
        Ok(Box::new(&mut self.stream))
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn close(&mut self) -> Result<()> {
        self.stream.get_mut().flush()?;
        Ok(())
    }
}
