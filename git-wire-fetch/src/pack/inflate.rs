//! Exact-boundary zlib inflation over a buffered reader.
//!
//! Pack entries are back-to-back zlib streams; a decoder that buffers ahead
//! would swallow the start of the next entry. This inflater feeds the raw
//! decompressor straight from `fill_buf` and consumes precisely the bytes
//! each stream used.

use std::io::BufRead;

use flate2::{Decompress, FlushDecompress, Status};

use crate::{Error, Result};

const OUT_CHUNK: usize = 16 * 1024;

pub(crate) struct Inflater {
    state: Decompress,
    chunk: Vec<u8>,
}

impl Inflater {
    pub(crate) fn new() -> Self {
        Self {
            state: Decompress::new(true),
            chunk: vec![0; OUT_CHUNK],
        }
    }

    /// Inflates one zlib stream that must decode to exactly `expected`
    /// bytes, leaving `input` positioned at the first byte after the stream.
    pub(crate) fn inflate_exact<R: BufRead>(
        &mut self,
        input: &mut R,
        expected: usize,
    ) -> Result<Vec<u8>> {
        self.state.reset(true);
        let mut out = Vec::with_capacity(expected.min(OUT_CHUNK));
        loop {
            let available = input.fill_buf().map_err(|err| Error::Core(err.into()))?;
            let at_eof = available.is_empty();
            let in_before = self.state.total_in();
            let out_before = self.state.total_out();
            let status = self
                .state
                .decompress(available, &mut self.chunk, FlushDecompress::None)
                .map_err(|err| Error::Inflate(err.to_string()))?;
            let consumed = (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            out.extend_from_slice(&self.chunk[..produced]);
            input.consume(consumed);

            if out.len() > expected {
                return Err(Error::Inflate(format!(
                    "object inflated past its declared size of {expected}"
                )));
            }
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if at_eof && consumed == 0 && produced == 0 {
                        return Err(Error::Inflate("zlib stream truncated".into()));
                    }
                }
            }
        }
        if out.len() != expected {
            return Err(Error::Inflate(format!(
                "object inflated to {} bytes, header declared {expected}",
                out.len()
            )));
        }
        Ok(out)
    }
}
