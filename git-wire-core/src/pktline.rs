//! The pkt-line framing used throughout the smart protocol.
//!
//! Every frame starts with four ASCII hex digits giving the total frame
//! length including the length prefix itself. Three lengths below 4 are
//! sentinels with no payload: `0000` (flush), `0001` (delimiter) and `0002`
//! (response end).

use std::io::{Read, Write};

use crate::{Error, Result};

/// The largest payload a single data frame may carry.
pub const MAX_DATA_LEN: usize = 65520;

/// The largest total frame length, prefix included.
pub const MAX_FRAME_LEN: usize = MAX_DATA_LEN + 4;

/// One decoded pkt-line frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketLine {
    /// A data frame and its payload.
    Data(Vec<u8>),
    /// The `0000` flush sentinel.
    Flush,
    /// The `0001` delimiter sentinel.
    Delim,
    /// The `0002` response-end sentinel.
    ResponseEnd,
}

impl PacketLine {
    /// Returns the payload of a data frame, `None` for sentinels.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            PacketLine::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns a data payload as text with one trailing newline removed.
    pub fn as_text(&self) -> Option<&[u8]> {
        self.data()
            .map(|data| data.strip_suffix(b"\n").unwrap_or(data))
    }
}

/// Decodes pkt-line frames from a byte stream.
pub struct Reader<R> {
    inner: R,
}

impl<R: Read> Reader<R> {
    /// Creates a frame reader over `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame. Returns `None` on a clean end of stream at a
    /// frame boundary.
    pub fn read_line(&mut self) -> Result<Option<PacketLine>> {
        let mut prefix = [0u8; 4];
        match self.inner.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let len = parse_length(&prefix)?;
        match len {
            0 => return Ok(Some(PacketLine::Flush)),
            1 => return Ok(Some(PacketLine::Delim)),
            2 => return Ok(Some(PacketLine::ResponseEnd)),
            3 => {
                return Err(Error::MalformedFrame(
                    "length 0003 is neither a sentinel nor a data frame".into(),
                ))
            }
            _ => {}
        }
        if len > MAX_FRAME_LEN {
            return Err(Error::MalformedFrame(format!(
                "frame length {len} exceeds the protocol maximum"
            )));
        }

        let mut data = vec![0u8; len - 4];
        self.inner
            .read_exact(&mut data)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    Error::MalformedFrame(format!("truncated payload, expected {} bytes", len - 4))
                }
                _ => Error::Io(err),
            })?;
        Ok(Some(PacketLine::Data(data)))
    }

    /// Reads frames up to and including the next flush. The flush itself is
    /// not returned. A stream that ends before the flush is an error.
    pub fn read_until_flush(&mut self) -> Result<Vec<PacketLine>> {
        let mut lines = Vec::new();
        loop {
            match self.read_line()? {
                Some(PacketLine::Flush) => return Ok(lines),
                Some(line) => lines.push(line),
                None => {
                    return Err(Error::MalformedFrame(
                        "stream ended before the expected flush-pkt".into(),
                    ))
                }
            }
        }
    }

    /// Returns a mutable reference to the underlying stream.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consumes the reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn parse_length(prefix: &[u8; 4]) -> Result<usize> {
    if !prefix.iter().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::MalformedFrame(format!(
            "non-hex length prefix {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    // The prefix is valid ASCII hex, so both conversions are infallible.
    let text = std::str::from_utf8(prefix)
        .map_err(|_| Error::MalformedFrame("non-ASCII length prefix".into()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| Error::MalformedFrame(format!("unparsable length prefix {text:?}")))
}

/// Encodes pkt-line frames onto a byte sink.
pub struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    /// Creates a frame writer over `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one data frame. Payloads above [`MAX_DATA_LEN`] are rejected;
    /// splitting at a meaningful boundary is the caller's contract.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::OversizedFrame(data.len()));
        }
        let prefix = format!("{:04x}", data.len() + 4);
        self.inner.write_all(prefix.as_bytes())?;
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Writes a textual protocol line, appending the conventional trailing
    /// newline when missing.
    pub fn write_text(&mut self, text: &[u8]) -> Result<()> {
        if text.ends_with(b"\n") {
            self.write_data(text)
        } else {
            let mut line = Vec::with_capacity(text.len() + 1);
            line.extend_from_slice(text);
            line.push(b'\n');
            self.write_data(&line)
        }
    }

    /// Writes the `0000` flush sentinel.
    pub fn write_flush(&mut self) -> Result<()> {
        self.inner.write_all(b"0000")?;
        Ok(())
    }

    /// Writes the `0001` delimiter sentinel.
    pub fn write_delim(&mut self) -> Result<()> {
        self.inner.write_all(b"0001")?;
        Ok(())
    }

    /// Writes the `0002` response-end sentinel.
    pub fn write_response_end(&mut self) -> Result<()> {
        self.inner.write_all(b"0002")?;
        Ok(())
    }

    /// Flushes the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Returns a mutable reference to the underlying sink.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consumes the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(line: &PacketLine) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = Writer::new(&mut out);
        match line {
            PacketLine::Data(data) => writer.write_data(data).unwrap(),
            PacketLine::Flush => writer.write_flush().unwrap(),
            PacketLine::Delim => writer.write_delim().unwrap(),
            PacketLine::ResponseEnd => writer.write_response_end().unwrap(),
        }
        out
    }

    #[test]
    fn encodes_data_with_hex_prefix() {
        assert_eq!(encode(&PacketLine::Data(b"hello\n".to_vec())), b"000ahello\n");
        assert_eq!(encode(&PacketLine::Flush), b"0000");
        assert_eq!(encode(&PacketLine::Delim), b"0001");
        assert_eq!(encode(&PacketLine::ResponseEnd), b"0002");
    }

    #[test]
    fn decodes_sentinels_and_data() {
        let mut reader = Reader::new(Cursor::new(b"0000000100020008abcd".to_vec()));
        assert_eq!(reader.read_line().unwrap(), Some(PacketLine::Flush));
        assert_eq!(reader.read_line().unwrap(), Some(PacketLine::Delim));
        assert_eq!(reader.read_line().unwrap(), Some(PacketLine::ResponseEnd));
        assert_eq!(
            reader.read_line().unwrap(),
            Some(PacketLine::Data(b"abcd".to_vec()))
        );
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn rejects_non_hex_length() {
        let mut reader = Reader::new(Cursor::new(b"zzzz".to_vec()));
        assert!(matches!(
            reader.read_line(),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_length_three() {
        let mut reader = Reader::new(Cursor::new(b"0003".to_vec()));
        assert!(matches!(
            reader.read_line(),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut reader = Reader::new(Cursor::new(b"0010shor".to_vec()));
        assert!(matches!(
            reader.read_line(),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_oversized_payload_on_write() {
        let mut writer = Writer::new(Vec::new());
        let payload = vec![0u8; MAX_DATA_LEN + 1];
        assert!(matches!(
            writer.write_data(&payload),
            Err(Error::OversizedFrame(_))
        ));
    }

    #[test]
    fn read_until_flush_collects_lines() {
        let mut bytes = Vec::new();
        {
            let mut writer = Writer::new(&mut bytes);
            writer.write_text(b"first").unwrap();
            writer.write_text(b"second").unwrap();
            writer.write_flush().unwrap();
        }
        let mut reader = Reader::new(Cursor::new(bytes));
        let lines = reader.read_until_flush().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_text(), Some(b"first".as_slice()));
    }

    #[test]
    fn missing_flush_is_an_error() {
        let mut reader = Reader::new(Cursor::new(b"0008abcd".to_vec()));
        assert!(reader.read_until_flush().is_err());
    }
}
