//! Streaming v2 packfile ingestion.

mod delta;
mod inflate;
mod reader;

pub use delta::apply as apply_delta;
pub use reader::{ingest, IngestStats, PackConfig};

pub(crate) use inflate::Inflater;
