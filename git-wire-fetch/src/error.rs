//! Error types for the fetch side.

use git_wire_core::ObjectId;

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures specific to pack ingestion and negotiation, on top of the shared
/// protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A shared protocol, transport or store failure.
    #[error(transparent)]
    Core(#[from] git_wire_core::Error),

    /// The pack stream was structurally broken outside a single entry:
    /// bad magic, unsupported version, or truncation between entries.
    #[error("malformed pack: {0}")]
    MalformedPack(String),

    /// A pack entry header carried a reserved or unknown type code.
    #[error("bad pack object header: type code {0}")]
    BadObjectHeader(u8),

    /// The pack trailer did not match the SHA-1 of the preceding bytes.
    #[error("pack checksum mismatch")]
    BadChecksum,

    /// A delta chain exceeded the configured depth limit.
    #[error("delta chain depth {0} exceeds the configured limit")]
    DeltaChainTooDeep(usize),

    /// A delta referenced a base that is neither in the pack nor in the
    /// store.
    #[error("missing delta base {0}")]
    MissingDeltaBase(String),

    /// A delta's instruction stream was inconsistent with its base or its
    /// declared result size.
    #[error("malformed delta: {0}")]
    MalformedDelta(String),

    /// A zlib stream inside the pack failed to inflate.
    #[error("inflate failed: {0}")]
    Inflate(String),

    /// The negotiation safeguard tripped after too many rounds.
    #[error("negotiation stalled after {max} rounds", max = crate::engine::MAX_ROUNDS)]
    NegotiationStalled,

    /// A requested want was not advertised and the server allows no
    /// unadvertised wants.
    #[error("want {0} is not advertised by the server")]
    WantNotAdvertised(ObjectId),

    /// A ref requested by name does not exist on the remote.
    #[error("remote has no ref {0}")]
    UnknownRef(bstr::BString),
}

impl Error {
    /// Recovers errors tunnelled through `std::io::Error` by `BufRead`
    /// adapters, attributing plain I/O trouble to `phase`.
    pub(crate) fn from_io(err: std::io::Error, phase: git_wire_core::transport::Phase) -> Self {
        git_wire_core::Error::from_io(err, phase).into()
    }

    /// Attributes stream deadline expiry inside a shared error to `phase`.
    pub(crate) fn attribute(
        err: git_wire_core::Error,
        phase: git_wire_core::transport::Phase,
    ) -> Self {
        match err {
            git_wire_core::Error::Io(io) => Self::from_io(io, phase),
            other => Error::Core(other),
        }
    }
}
