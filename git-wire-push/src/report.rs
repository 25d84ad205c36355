//! Parsing of the server's report-status reply.

use std::io::Read;

use bstr::BString;

use git_wire_core::pktline::{PacketLine, Reader};

use crate::{Error, Result};

/// The server's verdict on one ref command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    /// `ok <ref>`: the update was applied.
    Ok,
    /// `ng <ref> <reason>`: the update was refused. Carried as data, not as
    /// an error; the caller decides what a rejection means.
    Rejected(BString),
}

/// One line of the per-ref report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefResult {
    /// The ref the verdict concerns.
    pub name: BString,
    /// The verdict.
    pub status: RefStatus,
}

/// The full report-status reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// `Some(reason)` when the server failed to unpack the pack.
    pub unpack_error: Option<BString>,
    /// Per-ref verdicts in server order. Empty when `report-status` was not
    /// negotiated.
    pub refs: Vec<RefResult>,
}

impl PushOutcome {
    /// Whether the pack unpacked and every ref was accepted.
    pub fn is_success(&self) -> bool {
        self.unpack_error.is_none()
            && self.refs.iter().all(|r| r.status == RefStatus::Ok)
    }
}

/// Parses a report-status stream: an `unpack` line, then per-ref `ok`/`ng`
/// lines up to a flush (or end of stream).
pub fn parse_report<R: Read>(frames: &mut Reader<R>) -> Result<PushOutcome> {
    let mut outcome = PushOutcome::default();
    let mut saw_unpack = false;

    loop {
        let line = match frames.read_line().map_err(Error::Core)? {
            None | Some(PacketLine::Flush) => break,
            Some(PacketLine::Data(data)) => data,
            Some(_) => {
                return Err(Error::MalformedReport(
                    "unexpected sentinel in report".into(),
                ))
            }
        };
        let text = line.strip_suffix(b"\n").unwrap_or(&line);

        if let Some(rest) = text.strip_prefix(b"unpack ") {
            if saw_unpack {
                return Err(Error::MalformedReport("repeated unpack line".into()));
            }
            saw_unpack = true;
            if rest != b"ok" {
                outcome.unpack_error = Some(rest.into());
            }
            continue;
        }
        if let Some(rest) = text.strip_prefix(b"ok ") {
            outcome.refs.push(RefResult {
                name: rest.into(),
                status: RefStatus::Ok,
            });
            continue;
        }
        if let Some(rest) = text.strip_prefix(b"ng ") {
            let (name, reason) = match rest.iter().position(|&b| b == b' ') {
                Some(space) => (&rest[..space], &rest[space + 1..]),
                None => (rest, b"rejected".as_slice()),
            };
            outcome.refs.push(RefResult {
                name: name.into(),
                status: RefStatus::Rejected(reason.into()),
            });
            continue;
        }
        return Err(Error::MalformedReport(format!(
            "unexpected line {:?}",
            String::from_utf8_lossy(text)
        )));
    }

    if !saw_unpack && !outcome.refs.is_empty() {
        return Err(Error::MalformedReport(
            "per-ref verdicts without an unpack line".into(),
        ));
    }
    Ok(outcome)
}
