//! HTTP transport behind the download cache

use std::io::Read;
use std::time::Duration;

use super::DownloadError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Status line, declared length and a streaming body
pub struct HttpResponse {
    pub status: u16,
    /// Value of the `Content-Length` header, if present and numeric
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests on behalf of the download cache
///
/// Non-success statuses are returned as a normal response; only failures to
/// talk to the server at all are errors.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, DownloadError>;
}

/// Blocking transport backed by `ureq`
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .user_agent(concat!("pageview/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    fn into_response(resp: ureq::Response) -> HttpResponse {
        let status = resp.status();
        let content_length = resp
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        HttpResponse {
            status,
            content_length,
            body: Box::new(resp.into_reader()),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, DownloadError> {
        // Identity encoding keeps Content-Length comparable to the bytes we read.
        match self
            .agent
            .get(url)
            .set("Accept-Encoding", "identity")
            .call()
        {
            Ok(resp) => Ok(Self::into_response(resp)),
            Err(ureq::Error::Status(_, resp)) => Ok(Self::into_response(resp)),
            Err(ureq::Error::Transport(err)) => Err(DownloadError::network(err.to_string())),
        }
    }
}
