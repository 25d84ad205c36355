//! Error types shared across the protocol crates.

use bstr::BString;

use crate::transport::Phase;

/// Result type alias for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures produced by the protocol primitives and the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A pkt-line frame had a non-hex length, an impossible length, or a
    /// truncated payload.
    #[error("malformed pkt-line frame: {0}")]
    MalformedFrame(String),

    /// A data frame payload exceeded the pkt-line maximum.
    #[error("pkt-line payload of {0} bytes exceeds the maximum of {max}", max = crate::pktline::MAX_DATA_LEN)]
    OversizedFrame(usize),

    /// The server's ref advertisement could not be parsed.
    #[error("malformed ref advertisement: {0}")]
    MalformedAdvertisement(String),

    /// A capability was about to be asserted that the server never advertised.
    #[error("capability not advertised by the server: {0}")]
    UnknownCapabilityAsserted(String),

    /// An object id was not valid hex of the expected width.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// The remote side reported an error, either as an `ERR` line or over
    /// side-band channel 3.
    #[error("remote error: {0}")]
    Remote(BString),

    /// I/O error on the underlying byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure that is not a plain I/O error, such as an
    /// unexpected HTTP status or content type.
    #[error("transport error: {0}")]
    Transport(String),

    /// A per-phase deadline expired.
    #[error("transport timed out during {0:?}")]
    TransportTimeout(Phase),

    /// The object store reported a failure.
    #[error("object store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// The conversation was cancelled through its interrupt flag.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Recover a protocol error that was tunnelled through `std::io::Error`,
    /// as readers constrained to `io::Result` must do. Timeouts on the byte
    /// stream are attributed to `phase`.
    pub fn from_io(err: std::io::Error, phase: Phase) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Error::TransportTimeout(phase),
            ErrorKind::Other => match err.into_inner() {
                Some(inner) => match inner.downcast::<Error>() {
                    Ok(inner) => *inner,
                    Err(inner) => Error::Io(std::io::Error::new(ErrorKind::Other, inner)),
                },
                None => Error::Io(ErrorKind::Other.into()),
            },
            _ => Error::Io(err),
        }
    }

    /// Tunnel this error through `std::io::Error` for `Read`/`BufRead`
    /// adapters; `from_io` on the other side restores it.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
