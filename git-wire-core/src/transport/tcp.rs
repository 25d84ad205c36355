//! Dialing `git://` URLs into a persistent stream transport.

use std::net::TcpStream;
use std::time::Duration;

use crate::transport::stream::{DaemonInfo, PhasedStream, StreamTransport};
use crate::transport::Timeouts;
use crate::{Error, Result};

/// The IANA port of the git daemon.
pub const GIT_DAEMON_PORT: u16 = 9418;

/// A parsed `git://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    /// Host to connect to.
    pub host: String,
    /// Port, defaulting to [`GIT_DAEMON_PORT`].
    pub port: u16,
    /// Repository path, always starting with `/`.
    pub path: String,
}

/// Parses a `git://host[:port]/path` URL.
pub fn parse_git_url(url: &str) -> Result<GitUrl> {
    let rest = url
        .strip_prefix("git://")
        .ok_or_else(|| Error::Transport(format!("not a git:// URL: {url}")))?;
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(Error::Transport(format!("missing host in URL: {url}")));
    }
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Transport(format!("invalid port in URL: {url}")))?;
            (host, port)
        }
        None => (authority, GIT_DAEMON_PORT),
    };
    Ok(GitUrl {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

impl PhasedStream for TcpStream {
    fn arm_deadline(&mut self, deadline: Option<Duration>) -> std::io::Result<()> {
        self.set_read_timeout(deadline)?;
        self.set_write_timeout(deadline)
    }
}

/// Whether the environment requests protocol version 1 explicitly.
fn protocol_version1_requested() -> bool {
    std::env::var("GIT_PROTOCOL").map_or(false, |value| value == "version=1")
}

/// Connects to a `git://` URL, producing a persistent transport that will
/// send the daemon request line ahead of the advertisement.
pub fn connect(url: &str, timeouts: Timeouts) -> Result<StreamTransport<TcpStream>> {
    let parsed = parse_git_url(url)?;
    let stream = TcpStream::connect((parsed.host.as_str(), parsed.port))?;
    stream.set_nodelay(true)?;
    let daemon = DaemonInfo {
        host: parsed.host,
        port: parsed.port,
        path: parsed.path,
        version1: protocol_version1_requested(),
    };
    Ok(StreamTransport::with_daemon(stream, daemon).with_timeouts(timeouts))
}
