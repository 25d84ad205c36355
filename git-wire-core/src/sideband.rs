//! Side-band demultiplexing.
//!
//! When a side-band capability is in effect, every frame after negotiation
//! carries a one-byte band tag: `1` for pack data, `2` for progress text and
//! `3` for a fatal server message. The demultiplexer presents band 1 as a
//! contiguous byte stream and routes the other bands as they arrive.

use std::io::{BufRead, Read};

use crate::capability::CapabilitySet;
use crate::pktline::{PacketLine, Reader};
use crate::progress::ProgressSink;
use crate::Error;

/// Which side-band variant, if any, is in effect for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideBandMode {
    /// No side-band; the pack arrives as raw bytes after negotiation.
    #[default]
    None,
    /// `side-band`: frames carry at most 999 payload bytes after the tag.
    Basic,
    /// `side-band-64k`: frames carry at most 65519 payload bytes.
    SideBand64k,
}

impl SideBandMode {
    /// The variant implied by an effective capability set.
    pub fn from_caps(caps: &CapabilitySet) -> Self {
        if caps.contains("side-band-64k") {
            SideBandMode::SideBand64k
        } else if caps.contains("side-band") {
            SideBandMode::Basic
        } else {
            SideBandMode::None
        }
    }

    /// The maximum number of payload bytes after the band tag, or `None`
    /// when no side-band is in effect.
    pub fn max_payload(&self) -> Option<usize> {
        match self {
            SideBandMode::None => None,
            SideBandMode::Basic => Some(999),
            SideBandMode::SideBand64k => Some(65519),
        }
    }
}

/// Presents the band-1 bytes of a multiplexed stream as a [`BufRead`].
///
/// Band 2 is forwarded to the progress sink; band 3 aborts the stream with
/// [`Error::Remote`]. The stream ends at a flush-pkt or at end of input.
pub struct Demux<'a, R, P> {
    frames: &'a mut Reader<R>,
    progress: &'a mut P,
    buffer: Vec<u8>,
    position: usize,
    finished: bool,
}

impl<'a, R: Read, P: ProgressSink> Demux<'a, R, P> {
    /// Creates a demultiplexer over a frame reader.
    pub fn new(frames: &'a mut Reader<R>, progress: &'a mut P) -> Self {
        Self {
            frames,
            progress,
            buffer: Vec::new(),
            position: 0,
            finished: false,
        }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        while self.position == self.buffer.len() && !self.finished {
            match self.frames.read_line().map_err(Error::into_io)? {
                None | Some(PacketLine::Flush) => self.finished = true,
                Some(PacketLine::Data(frame)) => match frame.split_first() {
                    Some((&1, payload)) => {
                        self.buffer.clear();
                        self.buffer.extend_from_slice(payload);
                        self.position = 0;
                    }
                    Some((&2, payload)) => self.progress.info(payload),
                    Some((&3, payload)) => {
                        return Err(Error::Remote(payload.into()).into_io());
                    }
                    Some((&band, _)) => {
                        return Err(Error::MalformedFrame(format!(
                            "unknown side-band tag {band}"
                        ))
                        .into_io());
                    }
                    None => {
                        return Err(
                            Error::MalformedFrame("empty side-band frame".into()).into_io()
                        );
                    }
                },
                Some(_) => {
                    return Err(Error::MalformedFrame(
                        "unexpected sentinel inside side-band stream".into(),
                    )
                    .into_io());
                }
            }
        }
        Ok(())
    }
}

impl<R: Read, P: ProgressSink> Read for Demux<'_, R, P> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

impl<R: Read, P: ProgressSink> BufRead for Demux<'_, R, P> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.refill()?;
        Ok(&self.buffer[self.position..])
    }

    fn consume(&mut self, amount: usize) {
        self.position = (self.position + amount).min(self.buffer.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::Writer;
    use std::io::Cursor;

    struct Collect(Vec<Vec<u8>>);
    impl ProgressSink for Collect {
        fn info(&mut self, message: &[u8]) {
            self.0.push(message.to_vec());
        }
    }

    fn band_frame(band: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![band];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn splits_pack_and_progress_bands() {
        let mut bytes = Vec::new();
        {
            let mut frames = Writer::new(&mut bytes);
            frames.write_data(&band_frame(1, b"PACKdata")).unwrap();
            frames.write_data(&band_frame(2, b"Counting objects\r")).unwrap();
            frames.write_data(&band_frame(1, b"more")).unwrap();
            frames.write_flush().unwrap();
        }
        let mut frames = Reader::new(Cursor::new(bytes));
        let mut progress = Collect(Vec::new());
        let mut demux = Demux::new(&mut frames, &mut progress);
        let mut data = Vec::new();
        demux.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"PACKdatamore");
        assert_eq!(progress.0, vec![b"Counting objects\r".to_vec()]);
    }

    #[test]
    fn band_three_aborts_with_remote_error() {
        let mut bytes = Vec::new();
        {
            let mut frames = Writer::new(&mut bytes);
            frames.write_data(&band_frame(3, b"out of memory")).unwrap();
        }
        let mut frames = Reader::new(Cursor::new(bytes));
        let mut progress = Collect(Vec::new());
        let mut demux = Demux::new(&mut frames, &mut progress);
        let mut data = Vec::new();
        let err = demux.read_to_end(&mut data).unwrap_err();
        match Error::from_io(err, crate::transport::Phase::PackReceive) {
            Error::Remote(message) => assert_eq!(message, "out of memory"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn mode_from_caps() {
        assert_eq!(
            SideBandMode::from_caps(&CapabilitySet::parse(b"side-band-64k")),
            SideBandMode::SideBand64k
        );
        assert_eq!(
            SideBandMode::from_caps(&CapabilitySet::parse(b"side-band")),
            SideBandMode::Basic
        );
        assert_eq!(
            SideBandMode::from_caps(&CapabilitySet::parse(b"thin-pack")),
            SideBandMode::None
        );
        assert_eq!(SideBandMode::SideBand64k.max_payload(), Some(65519));
    }
}
