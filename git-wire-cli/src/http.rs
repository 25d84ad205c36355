//! The blocking HTTP requester behind the core's transport seam.

use std::io::BufReader;
use std::time::Duration;

use git_wire_core::transport::{HttpReply, Requester};
use git_wire_core::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

/// A [`Requester`] over a blocking reqwest client.
pub struct ReqwestRequester {
    client: Client,
}

impl ReqwestRequester {
    /// Builds a client with redirect following and a descriptive user agent.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("git-wire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    fn finish(response: reqwest::blocking::Response) -> Result<HttpReply> {
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                response.url()
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(HttpReply {
            content_type,
            body: Box::new(BufReader::new(response)),
        })
    }
}

impl Requester for ReqwestRequester {
    fn get(
        &mut self,
        url: &str,
        accept: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpReply> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .map_err(|err| Error::Transport(err.to_string()))?;
        Self::finish(response)
    }

    fn post(
        &mut self,
        url: &str,
        content_type: &str,
        accept: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<HttpReply> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, accept)
            .body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .map_err(|err| Error::Transport(err.to_string()))?;
        Self::finish(response)
    }
}
