//! Capability advertisement parsing and the effective-set rules.
//!
//! The server's capability list arrives once per conversation, after the NUL
//! on the first advertised ref. Whatever the server advertised is the upper
//! bound of what the client may assert back in any later phase.

use bstr::{BStr, BString};
use smallvec::SmallVec;

use crate::{Error, Result};

/// One capability token, with its argument where the token carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// `multi_ack`
    MultiAck,
    /// `multi_ack_detailed`
    MultiAckDetailed,
    /// `no-done`
    NoDone,
    /// `thin-pack`
    ThinPack,
    /// `side-band`
    SideBand,
    /// `side-band-64k`
    SideBand64k,
    /// `ofs-delta`
    OfsDelta,
    /// `agent=<string>`
    Agent(BString),
    /// `shallow`
    Shallow,
    /// `deepen-since`
    DeepenSince,
    /// `deepen-not`
    DeepenNot,
    /// `no-progress`
    NoProgress,
    /// `include-tag`
    IncludeTag,
    /// `report-status`
    ReportStatus,
    /// `delete-refs`
    DeleteRefs,
    /// `quiet`
    Quiet,
    /// `atomic`
    Atomic,
    /// `push-options`
    PushOptions,
    /// `allow-tip-sha1-in-want`
    AllowTipSha1InWant,
    /// `allow-reachable-sha1-in-want`
    AllowReachableSha1InWant,
    /// `push-cert=<nonce>`
    PushCert(BString),
    /// `symref=<ref>:<target>`
    Symref {
        /// The symbolic ref, e.g. `HEAD`.
        name: BString,
        /// The ref it points at, e.g. `refs/heads/main`.
        target: BString,
    },
    /// A token this client does not know. Preserved, never asserted back.
    Other(BString),
}

impl Capability {
    /// Parses one space-delimited capability token.
    pub fn parse(token: &[u8]) -> Self {
        let (flag, value) = match token.iter().position(|&b| b == b'=') {
            Some(eq) => (&token[..eq], Some(&token[eq + 1..])),
            None => (token, None),
        };
        match (flag, value) {
            (b"multi_ack", None) => Capability::MultiAck,
            (b"multi_ack_detailed", None) => Capability::MultiAckDetailed,
            (b"no-done", None) => Capability::NoDone,
            (b"thin-pack", None) => Capability::ThinPack,
            (b"side-band", None) => Capability::SideBand,
            (b"side-band-64k", None) => Capability::SideBand64k,
            (b"ofs-delta", None) => Capability::OfsDelta,
            (b"agent", Some(value)) => Capability::Agent(value.into()),
            (b"shallow", None) => Capability::Shallow,
            (b"deepen-since", None) => Capability::DeepenSince,
            (b"deepen-not", None) => Capability::DeepenNot,
            (b"no-progress", None) => Capability::NoProgress,
            (b"include-tag", None) => Capability::IncludeTag,
            (b"report-status", None) => Capability::ReportStatus,
            (b"delete-refs", None) => Capability::DeleteRefs,
            (b"quiet", None) => Capability::Quiet,
            (b"atomic", None) => Capability::Atomic,
            (b"push-options", None) => Capability::PushOptions,
            (b"allow-tip-sha1-in-want", None) => Capability::AllowTipSha1InWant,
            (b"allow-reachable-sha1-in-want", None) => Capability::AllowReachableSha1InWant,
            (b"push-cert", Some(value)) => Capability::PushCert(value.into()),
            (b"symref", Some(value)) => match value.iter().position(|&b| b == b':') {
                Some(colon) => Capability::Symref {
                    name: value[..colon].into(),
                    target: value[colon + 1..].into(),
                },
                None => Capability::Other(token.into()),
            },
            _ => Capability::Other(token.into()),
        }
    }

    /// The token's flag name, without any argument.
    pub fn flag(&self) -> &str {
        match self {
            Capability::MultiAck => "multi_ack",
            Capability::MultiAckDetailed => "multi_ack_detailed",
            Capability::NoDone => "no-done",
            Capability::ThinPack => "thin-pack",
            Capability::SideBand => "side-band",
            Capability::SideBand64k => "side-band-64k",
            Capability::OfsDelta => "ofs-delta",
            Capability::Agent(_) => "agent",
            Capability::Shallow => "shallow",
            Capability::DeepenSince => "deepen-since",
            Capability::DeepenNot => "deepen-not",
            Capability::NoProgress => "no-progress",
            Capability::IncludeTag => "include-tag",
            Capability::ReportStatus => "report-status",
            Capability::DeleteRefs => "delete-refs",
            Capability::Quiet => "quiet",
            Capability::Atomic => "atomic",
            Capability::PushOptions => "push-options",
            Capability::AllowTipSha1InWant => "allow-tip-sha1-in-want",
            Capability::AllowReachableSha1InWant => "allow-reachable-sha1-in-want",
            Capability::PushCert(_) => "push-cert",
            Capability::Symref { .. } => "symref",
            Capability::Other(token) => {
                let token = token.as_slice();
                let flag = match token.iter().position(|&b| b == b'=') {
                    Some(eq) => &token[..eq],
                    None => token,
                };
                std::str::from_utf8(flag).unwrap_or("")
            }
        }
    }

    /// Renders the token back to its wire form.
    pub fn render(&self) -> BString {
        match self {
            Capability::Agent(value) => join_value("agent", value),
            Capability::PushCert(value) => join_value("push-cert", value),
            Capability::Symref { name, target } => {
                let mut out = BString::from("symref=");
                out.extend_from_slice(name);
                out.push(b':');
                out.extend_from_slice(target);
                out
            }
            Capability::Other(token) => token.clone(),
            plain => plain.flag().into(),
        }
    }
}

fn join_value(flag: &str, value: &[u8]) -> BString {
    let mut out = BString::from(flag);
    out.push(b'=');
    out.extend_from_slice(value);
    out
}

/// How finely the server acknowledges common objects during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiAckMode {
    /// Neither `multi_ack` token advertised.
    #[default]
    None,
    /// Plain `multi_ack`.
    Basic,
    /// `multi_ack_detailed`.
    Detailed,
}

/// The parsed capability list of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    /// Parses the space-separated capability list from the advertisement's
    /// NUL suffix.
    pub fn parse(bytes: &[u8]) -> Self {
        let caps = bytes
            .split(|&b| b == b' ' || b == b'\n')
            .filter(|token| !token.is_empty())
            .map(Capability::parse)
            .collect();
        Self { caps }
    }

    /// Builds a set from already-typed capabilities.
    pub fn from_caps(caps: Vec<Capability>) -> Self {
        Self { caps }
    }

    /// Renders the set as the space-separated wire form.
    pub fn render(&self) -> BString {
        let mut out = BString::from("");
        for (index, cap) in self.caps.iter().enumerate() {
            if index > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(&cap.render());
        }
        out
    }

    /// Returns `true` if a token with the given flag name is present,
    /// regardless of its argument.
    pub fn contains(&self, flag: &str) -> bool {
        self.caps.iter().any(|cap| cap.flag() == flag)
    }

    /// Adds a capability to the set.
    pub fn push(&mut self, cap: Capability) {
        self.caps.push(cap);
    }

    /// Iterates over the capabilities in advertisement order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.caps.iter()
    }

    /// Returns `true` when no capability was advertised.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// The server's `agent` string, if advertised.
    pub fn agent(&self) -> Option<&BStr> {
        self.caps.iter().find_map(|cap| match cap {
            Capability::Agent(value) => Some(value.as_slice().into()),
            _ => None,
        })
    }

    /// All advertised symrefs. Almost always just `HEAD`.
    pub fn symrefs(&self) -> SmallVec<[(&BStr, &BStr); 2]> {
        self.caps
            .iter()
            .filter_map(|cap| match cap {
                Capability::Symref { name, target } => {
                    Some((name.as_slice().into(), target.as_slice().into()))
                }
                _ => None,
            })
            .collect()
    }

    /// The negotiation dialect implied by the advertised tokens.
    pub fn multi_ack_mode(&self) -> MultiAckMode {
        if self.contains("multi_ack_detailed") {
            MultiAckMode::Detailed
        } else if self.contains("multi_ack") {
            MultiAckMode::Basic
        } else {
            MultiAckMode::None
        }
    }

    /// The side-band variant the client should assert: at most one of
    /// `side-band-64k` / `side-band`, preferring the wider frames.
    pub fn side_band_choice(&self) -> Option<Capability> {
        if self.contains("side-band-64k") {
            Some(Capability::SideBand64k)
        } else if self.contains("side-band") {
            Some(Capability::SideBand)
        } else {
            None
        }
    }

    /// Computes the effective set for the conversation: every requested
    /// capability must have been advertised, and unknown advertised tokens
    /// are never echoed back.
    pub fn effective(&self, requested: &[Capability]) -> Result<CapabilitySet> {
        let mut caps = Vec::with_capacity(requested.len());
        for cap in requested {
            if matches!(cap, Capability::Other(_)) || !self.contains(cap.flag()) {
                return Err(Error::UnknownCapabilityAsserted(cap.flag().to_string()));
            }
            caps.push(cap.clone());
        }
        Ok(CapabilitySet { caps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_arguments() {
        let caps = CapabilitySet::parse(
            b"multi_ack_detailed side-band-64k ofs-delta agent=git/2.43.0 symref=HEAD:refs/heads/main frobnicate",
        );
        assert!(caps.contains("multi_ack_detailed"));
        assert!(caps.contains("ofs-delta"));
        assert_eq!(caps.agent().map(|a| a.to_vec()), Some(b"git/2.43.0".to_vec()));
        assert_eq!(caps.symrefs().len(), 1);
        assert!(caps.contains("frobnicate"));
        assert_eq!(caps.multi_ack_mode(), MultiAckMode::Detailed);
    }

    #[test]
    fn render_round_trips_unknown_tokens() {
        let caps = CapabilitySet::parse(b"thin-pack frobnicate=3 report-status");
        assert_eq!(caps.render(), "thin-pack frobnicate=3 report-status");
    }

    #[test]
    fn side_band_choice_prefers_64k() {
        let both = CapabilitySet::parse(b"side-band side-band-64k");
        assert_eq!(both.side_band_choice(), Some(Capability::SideBand64k));
        let narrow = CapabilitySet::parse(b"side-band");
        assert_eq!(narrow.side_band_choice(), Some(Capability::SideBand));
        assert_eq!(CapabilitySet::default().side_band_choice(), None);
    }

    #[test]
    fn effective_rejects_unadvertised() {
        let advertised = CapabilitySet::parse(b"thin-pack side-band-64k");
        assert!(advertised.effective(&[Capability::ThinPack]).is_ok());
        assert!(matches!(
            advertised.effective(&[Capability::OfsDelta]),
            Err(Error::UnknownCapabilityAsserted(_))
        ));
    }

    #[test]
    fn effective_never_asserts_unknown_tokens() {
        let advertised = CapabilitySet::parse(b"frobnicate");
        assert!(advertised
            .effective(&[Capability::Other("frobnicate".into())])
            .is_err());
    }

    #[test]
    fn plain_multi_ack_is_recognized() {
        let caps = CapabilitySet::parse(b"multi_ack");
        assert_eq!(caps.multi_ack_mode(), MultiAckMode::Basic);
    }
}
