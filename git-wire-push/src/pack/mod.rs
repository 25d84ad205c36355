//! Packfile generation with delta compression.

mod encode;
mod writer;

pub use encode::delta;
pub use writer::{write_pack, IndexEntry, ObjectRef, WriterConfig};
