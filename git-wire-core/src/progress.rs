//! Progress reporting sinks.
//!
//! Progress text originates on side-band channel 2 and from the pack
//! machinery itself; sinks decide whether it reaches a terminal.

use std::io::Write;

/// A minimal sink for user-visible progress messages.
pub trait ProgressSink {
    /// Emit one progress message. Messages may end in `\r` for in-place
    /// updates or `\n` for completed lines.
    fn info(&mut self, message: &[u8]);
}

/// Discards all progress messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ProgressSink for Discard {
    fn info(&mut self, _message: &[u8]) {}
}

/// Forwards progress messages to a writer, typically stderr.
pub struct WriteSink<W> {
    inner: W,
}

impl<W: Write> WriteSink<W> {
    /// Creates a sink writing to `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> ProgressSink for WriteSink<W> {
    fn info(&mut self, message: &[u8]) {
        let _ = self.inner.write_all(message);
        let _ = self.inner.flush();
    }
}
