//! Parsing of the server's initial ref advertisement.
//!
//! The advertisement is a sequence of pkt-lines terminated by a flush. The
//! first data line carries the capability list after a NUL; later lines do
//! not. A name suffixed `^{}` is the peeled target of the preceding ref. An
//! empty repository advertises a single synthetic
//! `<zero-id> capabilities^{}` line that exists only to carry capabilities.

use std::collections::HashSet;
use std::io::Read;

use bstr::BString;

use crate::capability::CapabilitySet;
use crate::hash::ObjectId;
use crate::pktline::{PacketLine, Reader};
use crate::{Error, Result};

/// One advertised ref. `peeled` marks the `^{}` companion entry that carries
/// the target of an annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertised {
    /// The object the ref (or its peeled form) points to.
    pub target: ObjectId,
    /// The full ref name, without any `^{}` suffix.
    pub name: BString,
    /// Whether this entry is the peeled target of `name`.
    pub peeled: bool,
}

/// The parsed advertisement: refs in server order plus the capability set.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    /// Advertised refs, peeled entries included.
    pub refs: Vec<Advertised>,
    /// The capabilities from the first line's NUL suffix.
    pub capabilities: CapabilitySet,
}

impl Advertisement {
    /// The non-peeled entry for `name`, if advertised.
    pub fn find(&self, name: &[u8]) -> Option<&Advertised> {
        self.refs
            .iter()
            .find(|r| !r.peeled && r.name.as_slice() == name)
    }

    /// Whether `id` appears anywhere in the advertisement.
    pub fn mentions(&self, id: &ObjectId) -> bool {
        self.refs.iter().any(|r| r.target == *id)
    }
}

/// Reads and parses an advertisement from `frames`, consuming the
/// terminating flush.
pub fn parse<R: Read>(frames: &mut Reader<R>) -> Result<Advertisement> {
    let mut advert = Advertisement::default();
    let mut seen: HashSet<BString> = HashSet::new();
    let mut first = true;

    loop {
        let line = match frames.read_line()? {
            Some(PacketLine::Flush) => break,
            Some(PacketLine::Data(data)) => data,
            Some(_) => {
                return Err(Error::MalformedAdvertisement(
                    "unexpected non-data frame before flush".into(),
                ))
            }
            None => {
                return Err(Error::MalformedAdvertisement(
                    "stream ended before the terminating flush".into(),
                ))
            }
        };

        if let Some(message) = line.strip_prefix(b"ERR ") {
            let message = message.strip_suffix(b"\n").unwrap_or(message);
            return Err(Error::Remote(message.into()));
        }

        let (entry, caps) = match line.iter().position(|&b| b == 0) {
            Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
            None => (line.as_slice(), None),
        };
        if first {
            let caps = caps.ok_or_else(|| {
                Error::MalformedAdvertisement("first line carries no capability suffix".into())
            })?;
            advert.capabilities = CapabilitySet::parse(caps);
        } else if caps.is_some() {
            return Err(Error::MalformedAdvertisement(
                "capability suffix repeated after the first line".into(),
            ));
        }

        let entry = entry.strip_suffix(b"\n").unwrap_or(entry);
        let space = entry.iter().position(|&b| b == b' ').ok_or_else(|| {
            Error::MalformedAdvertisement("line lacks the `<id> <name>` separator".into())
        })?;
        let target = ObjectId::from_hex(&entry[..space])
            .map_err(|_| Error::MalformedAdvertisement("unparsable object id".into()))?;
        let name = &entry[space + 1..];
        if name.is_empty() {
            return Err(Error::MalformedAdvertisement("empty ref name".into()));
        }

        // The synthetic line of an empty repository: capabilities only.
        if first && target.is_null() && name == b"capabilities^{}" {
            first = false;
            continue;
        }

        let (name, peeled) = match name.strip_suffix(b"^{}") {
            Some(base) => (base, true),
            None => (name, false),
        };
        if peeled {
            match advert.refs.last() {
                Some(prev) if !prev.peeled && prev.name.as_slice() == name => {}
                _ => {
                    return Err(Error::MalformedAdvertisement(format!(
                        "peeled entry {} does not follow its ref",
                        String::from_utf8_lossy(name)
                    )))
                }
            }
        } else if !seen.insert(BString::from(name)) {
            return Err(Error::MalformedAdvertisement(format!(
                "duplicate ref name {}",
                String::from_utf8_lossy(name)
            )));
        }

        advert.refs.push(Advertised {
            target,
            name: name.into(),
            peeled,
        });
        first = false;
    }

    Ok(advert)
}

/// Renders an advertisement back to pkt-line bytes. The inverse of [`parse`],
/// used by tests and by servers embedded in fixtures.
pub fn render(advert: &Advertisement) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut frames = crate::pktline::Writer::new(&mut out);
    let caps = advert.capabilities.render();

    if advert.refs.is_empty() {
        let mut line = BString::from(ObjectId::ZERO.to_hex());
        line.extend_from_slice(b" capabilities^{}\0");
        line.extend_from_slice(&caps);
        frames.write_text(&line)?;
    } else {
        for (index, entry) in advert.refs.iter().enumerate() {
            let mut line = BString::from(entry.target.to_hex());
            line.push(b' ');
            line.extend_from_slice(&entry.name);
            if entry.peeled {
                line.extend_from_slice(b"^{}");
            }
            if index == 0 {
                line.push(0);
                line.extend_from_slice(&caps);
            }
            frames.write_text(&line)?;
        }
    }
    frames.write_flush()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_bytes(bytes: &[u8]) -> Result<Advertisement> {
        parse(&mut Reader::new(Cursor::new(bytes.to_vec())))
    }

    fn advert_line(frames: &mut crate::pktline::Writer<&mut Vec<u8>>, text: &str) {
        frames.write_text(text.as_bytes()).unwrap();
    }

    const H1: &str = "1111111111111111111111111111111111111111";
    const H2: &str = "2222222222222222222222222222222222222222";

    #[test]
    fn parses_refs_and_capabilities() {
        let mut bytes = Vec::new();
        let mut frames = crate::pktline::Writer::new(&mut bytes);
        advert_line(
            &mut frames,
            &format!("{H1} refs/heads/main\0multi_ack thin-pack side-band-64k"),
        );
        advert_line(&mut frames, &format!("{H2} refs/tags/v1.0"));
        advert_line(&mut frames, &format!("{H1} refs/tags/v1.0^{{}}"));
        frames.write_flush().unwrap();

        let advert = parse_bytes(&bytes).unwrap();
        assert_eq!(advert.refs.len(), 3);
        assert_eq!(advert.refs[0].name, "refs/heads/main");
        assert!(!advert.refs[0].peeled);
        assert_eq!(advert.refs[2].name, "refs/tags/v1.0");
        assert!(advert.refs[2].peeled);
        assert!(advert.capabilities.contains("side-band-64k"));
        assert!(advert.find(b"refs/tags/v1.0").is_some());
    }

    #[test]
    fn empty_repository_advertises_capabilities_only() {
        let mut bytes = Vec::new();
        let mut frames = crate::pktline::Writer::new(&mut bytes);
        advert_line(
            &mut frames,
            "0000000000000000000000000000000000000000 capabilities^{}\0multi_ack side-band-64k",
        );
        frames.write_flush().unwrap();

        let advert = parse_bytes(&bytes).unwrap();
        assert!(advert.refs.is_empty());
        assert!(advert.capabilities.contains("multi_ack"));
        assert!(advert.capabilities.contains("side-band-64k"));
    }

    #[test]
    fn duplicate_ref_names_are_rejected() {
        let mut bytes = Vec::new();
        let mut frames = crate::pktline::Writer::new(&mut bytes);
        advert_line(&mut frames, &format!("{H1} refs/heads/main\0thin-pack"));
        advert_line(&mut frames, &format!("{H2} refs/heads/main"));
        frames.write_flush().unwrap();

        assert!(matches!(
            parse_bytes(&bytes),
            Err(Error::MalformedAdvertisement(_))
        ));
    }

    #[test]
    fn err_line_surfaces_as_remote_error() {
        let mut bytes = Vec::new();
        let mut frames = crate::pktline::Writer::new(&mut bytes);
        frames.write_text(b"ERR access denied").unwrap();
        frames.write_flush().unwrap();

        match parse_bytes(&bytes) {
            Err(Error::Remote(message)) => assert_eq!(message, "access denied"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn orphan_peeled_entry_is_rejected() {
        let mut bytes = Vec::new();
        let mut frames = crate::pktline::Writer::new(&mut bytes);
        advert_line(&mut frames, &format!("{H1} refs/heads/main\0thin-pack"));
        advert_line(&mut frames, &format!("{H2} refs/tags/v1.0^{{}}"));
        frames.write_flush().unwrap();

        assert!(matches!(
            parse_bytes(&bytes),
            Err(Error::MalformedAdvertisement(_))
        ));
    }

    #[test]
    fn render_parse_round_trip() {
        let advert = Advertisement {
            refs: vec![
                Advertised {
                    target: ObjectId::from_hex(H1.as_bytes()).unwrap(),
                    name: "refs/heads/main".into(),
                    peeled: false,
                },
                Advertised {
                    target: ObjectId::from_hex(H2.as_bytes()).unwrap(),
                    name: "refs/heads/dev".into(),
                    peeled: false,
                },
            ],
            capabilities: CapabilitySet::parse(b"multi_ack_detailed no-done agent=git/2.43.0"),
        };
        let bytes = render(&advert).unwrap();
        let reparsed = parse_bytes(&bytes).unwrap();
        assert_eq!(reparsed.refs, advert.refs);
        assert_eq!(
            reparsed.capabilities.render(),
            advert.capabilities.render()
        );
    }
}
