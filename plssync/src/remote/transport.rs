use std::io;
use std::time::Duration;

use tracing::trace;
use ureq::Agent;

use crate::errors::{Result, SyncError};

/// Connect and read bounds applied to every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(10),
        }
    }
}

/// Status and body of a completed request; any status, not only 200.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Blocking GET used by remote source clients.
///
/// Implementations classify failures into `ConnectTimeout`, `ReadTimeout`
/// and `Transport`; non-200 replies are returned, not turned into errors.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, timeouts: &Timeouts) -> Result<HttpReply>;
}

/// [`HttpTransport`] over a shared `ureq` agent, so connections are reused
/// between requests of the same client.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .build();
        UreqTransport {
            agent: config.into(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str, timeouts: &Timeouts) -> Result<HttpReply> {
        let mut response = self
            .agent
            .get(url)
            .config()
            .timeout_resolve(Some(timeouts.connect))
            .timeout_connect(Some(timeouts.connect))
            .timeout_recv_response(Some(timeouts.read))
            .timeout_recv_body(Some(timeouts.read))
            .build()
            .call()
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(classify_error)?;
        trace!(status, bytes = body.len(), "reply received");

        Ok(HttpReply { status, body })
    }
}

fn classify_error(err: ureq::Error) -> SyncError {
    match err {
        ureq::Error::Timeout(ureq::Timeout::Resolve | ureq::Timeout::Connect) => {
            SyncError::ConnectTimeout(err.to_string())
        }
        ureq::Error::Timeout(_) => SyncError::ReadTimeout(err.to_string()),
        ureq::Error::Io(io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
            SyncError::ReadTimeout(io_err.to_string())
        }
        other => SyncError::Transport(other.to_string()),
    }
}
