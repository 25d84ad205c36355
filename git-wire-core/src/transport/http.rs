//! The stateless smart-HTTP transport.
//!
//! Each client-to-server phase becomes one POST carrying the buffered
//! pkt-line body; the advertisement is a separate GET against
//! `/info/refs?service=…`. The HTTP client itself stays outside the core,
//! behind the [`Requester`] seam.

use std::io::{BufRead, Read};
use std::time::Duration;

use crate::pktline::{PacketLine, Reader};
use crate::transport::{Phase, Service, Timeouts, Transport};
use crate::{Error, Result};

/// A reply from the HTTP client: the content type, if any, plus the body.
pub struct HttpReply {
    /// The `Content-Type` response header.
    pub content_type: Option<String>,
    /// The response body.
    pub body: Box<dyn BufRead>,
}

/// The seam to an actual HTTP client. Implementations live with the caller;
/// the reference front-end provides one over a blocking client.
pub trait Requester {
    /// Issues a GET, with `Accept: {accept}` and the given extra headers.
    fn get(
        &mut self,
        url: &str,
        accept: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpReply>;

    /// Issues a POST with the given content type and body.
    fn post(
        &mut self,
        url: &str,
        content_type: &str,
        accept: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<HttpReply>;
}

/// A [`Transport`] over stateless request/response exchanges.
pub struct HttpTransport<C> {
    requester: C,
    base_url: String,
    timeouts: Timeouts,
    phase: Phase,
    current: Option<Box<dyn BufRead>>,
}

impl<C: Requester> HttpTransport<C> {
    /// Creates a transport for the repository at `base_url`.
    pub fn new(requester: C, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            requester,
            base_url,
            timeouts: Timeouts::default(),
            phase: Phase::Advertisement,
            current: None,
        }
    }

    /// Sets the per-phase deadlines, applied per request.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Consumes the transport, returning the requester.
    pub fn into_requester(self) -> C {
        self.requester
    }

    fn protocol_headers() -> Vec<(&'static str, &'static str)> {
        match std::env::var("GIT_PROTOCOL") {
            Ok(value) if value == "version=1" => vec![("Git-Protocol", "version=1")],
            _ => Vec::new(),
        }
    }

    fn expect_content_type(reply: &HttpReply, expected: &str) -> Result<()> {
        match reply.content_type.as_deref() {
            Some(actual) if actual.starts_with(expected) => Ok(()),
            Some(actual) => Err(Error::Transport(format!(
                "unexpected content type {actual}, wanted {expected}; \
                 dumb HTTP servers are not supported"
            ))),
            None => Err(Error::Transport(format!(
                "response carries no content type, wanted {expected}"
            ))),
        }
    }

    /// Strips the `# service=git-…` banner and its flush from the
    /// advertisement body, leaving the reader at the first ref line.
    fn strip_service_banner(body: Box<dyn BufRead>, service: Service) -> Result<Box<dyn BufRead>> {
        let mut frames = Reader::new(body);
        let banner = match frames.read_line()? {
            Some(PacketLine::Data(data)) => data,
            _ => {
                return Err(Error::MalformedAdvertisement(
                    "missing smart-HTTP service banner".into(),
                ))
            }
        };
        let banner = banner.strip_suffix(b"\n").unwrap_or(&banner);
        let expected = format!("# service={}", service.name());
        if banner != expected.as_bytes() {
            return Err(Error::MalformedAdvertisement(format!(
                "unexpected service banner {:?}",
                String::from_utf8_lossy(banner)
            )));
        }
        match frames.read_line()? {
            Some(PacketLine::Flush) => {}
            _ => {
                return Err(Error::MalformedAdvertisement(
                    "service banner is not followed by a flush".into(),
                ))
            }
        }
        Ok(frames.into_inner())
    }
}

impl<C: Requester> Transport for HttpTransport<C> {
    fn stateless(&self) -> bool {
        true
    }

    fn request_advertisement(&mut self, service: Service) -> Result<()> {
        let url = format!("{}/info/refs?service={}", self.base_url, service.name());
        let accept = format!("application/x-{}-advertisement", service.name());
        let headers = Self::protocol_headers();
        let reply = self.requester.get(
            &url,
            &accept,
            &headers,
            self.timeouts.for_phase(self.phase),
        )?;
        Self::expect_content_type(&reply, &accept)?;
        self.current = Some(Self::strip_service_banner(reply.body, service)?);
        Ok(())
    }

    fn send(&mut self, service: Service, body: &mut dyn Read) -> Result<()> {
        let url = format!("{}/{}", self.base_url, service.name());
        let content_type = format!("application/x-{}-request", service.name());
        let accept = format!("application/x-{}-result", service.name());
        let headers = Self::protocol_headers();
        let mut buffered = Vec::new();
        body.read_to_end(&mut buffered)?;
        let reply = self.requester.post(
            &url,
            &content_type,
            &accept,
            &headers,
            buffered,
            self.timeouts.for_phase(self.phase),
        )?;
        Self::expect_content_type(&reply, &accept)?;
        self.current = Some(reply.body);
        Ok(())
    }

    fn reply(&mut self) -> Result<Box<dyn BufRead + '_>> {
        match self.current.as_mut() {
            Some(body) => Ok(Box::new(body.as_mut())),
            None => Err(Error::Transport(
                "no request in flight to read a reply from".into(),
            )),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::Writer;
    use std::collections::VecDeque;
    use std::io::Cursor;

    struct Scripted {
        replies: VecDeque<(String, Vec<u8>)>,
        requests: Vec<String>,
    }

    impl Requester for Scripted {
        fn get(
            &mut self,
            url: &str,
            _accept: &str,
            _headers: &[(&str, &str)],
            _timeout: Option<Duration>,
        ) -> Result<HttpReply> {
            self.requests.push(format!("GET {url}"));
            let (content_type, body) = self.replies.pop_front().expect("scripted reply");
            Ok(HttpReply {
                content_type: Some(content_type),
                body: Box::new(Cursor::new(body)),
            })
        }

        fn post(
            &mut self,
            url: &str,
            _content_type: &str,
            _accept: &str,
            _headers: &[(&str, &str)],
            _body: Vec<u8>,
            _timeout: Option<Duration>,
        ) -> Result<HttpReply> {
            self.requests.push(format!("POST {url}"));
            let (content_type, body) = self.replies.pop_front().expect("scripted reply");
            Ok(HttpReply {
                content_type: Some(content_type),
                body: Box::new(Cursor::new(body)),
            })
        }
    }

    #[test]
    fn advertisement_banner_is_stripped() {
        let mut body = Vec::new();
        {
            let mut frames = Writer::new(&mut body);
            frames.write_text(b"# service=git-upload-pack").unwrap();
            frames.write_flush().unwrap();
            frames
                .write_text(b"0000000000000000000000000000000000000000 capabilities^{}\0multi_ack")
                .unwrap();
            frames.write_flush().unwrap();
        }
        let requester = Scripted {
            replies: VecDeque::from([(
                "application/x-git-upload-pack-advertisement".to_string(),
                body,
            )]),
            requests: Vec::new(),
        };
        let mut transport = HttpTransport::new(requester, "https://example.com/repo.git/");
        transport.request_advertisement(Service::UploadPack).unwrap();
        let advert = {
            let reader = transport.reply().unwrap();
            crate::advert::parse(&mut Reader::new(reader)).unwrap()
        };
        assert!(advert.refs.is_empty());
        assert!(advert.capabilities.contains("multi_ack"));
        assert_eq!(
            transport.requester.requests,
            vec!["GET https://example.com/repo.git/info/refs?service=git-upload-pack"]
        );
    }

    #[test]
    fn wrong_content_type_is_a_transport_error() {
        let requester = Scripted {
            replies: VecDeque::from([("text/html".to_string(), Vec::new())]),
            requests: Vec::new(),
        };
        let mut transport = HttpTransport::new(requester, "https://example.com/repo.git");
        assert!(matches!(
            transport.request_advertisement(Service::UploadPack).err(),
            Some(Error::Transport(_))
        ));
    }
}
