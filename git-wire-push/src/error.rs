//! Error types for the push side.

use git_wire_core::ObjectId;

/// Result type alias for push operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures specific to pack generation and the push conversation, on top of
/// the shared protocol errors. Per-ref rejections are not errors; they are
/// data in [`crate::report::PushOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A shared protocol, transport or store failure.
    #[error(transparent)]
    Core(#[from] git_wire_core::Error),

    /// A `Delete` command was requested but the server did not advertise
    /// `delete-refs`.
    #[error("server does not support deleting refs")]
    DeleteUnsupported,

    /// Push options were requested but the server did not advertise
    /// `push-options`.
    #[error("server does not support push options")]
    PushOptionsUnsupported,

    /// An object required for the outgoing pack is missing locally.
    #[error("object {0} required for the pack is not in the local store")]
    MissingObject(ObjectId),

    /// The server's report-status reply could not be parsed.
    #[error("malformed report-status: {0}")]
    MalformedReport(String),
}

impl Error {
    /// Attributes stream deadline expiry inside a shared error to `phase`.
    pub(crate) fn attribute(
        err: git_wire_core::Error,
        phase: git_wire_core::transport::Phase,
    ) -> Self {
        match err {
            git_wire_core::Error::Io(io) => {
                Error::Core(git_wire_core::Error::from_io(io, phase))
            }
            other => Error::Core(other),
        }
    }
}
