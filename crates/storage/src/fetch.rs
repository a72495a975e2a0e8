//! Plain HTTP retrieval.

use std::io::Read;
use std::time::Duration;

/// Failure of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, connection, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Minimal HTTP client used by the resolver and the storage REST client.
pub trait HttpFetcher: Send + Sync {
    /// `GET url` and return the body.
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, FetchError>;

    /// `POST url` with a JSON body and return the response body.
    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Result<Vec<u8>, FetchError>;
}

/// [`HttpFetcher`] backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl UreqFetcher {
    /// Agent with an optional overall request timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new().user_agent("flipbook-viewer");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self { agent: builder.build() }
    }

    fn finish(result: Result<ureq::Response, ureq::Error>) -> Result<Vec<u8>, FetchError> {
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(FetchError::Status { status, body });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport(transport.to_string()));
            }
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Body(e.to_string()))?;
        Ok(bytes)
    }
}

impl HttpFetcher for UreqFetcher {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, FetchError> {
        log::debug!("GET {url}");
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        Self::finish(request.call())
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Result<Vec<u8>, FetchError> {
        log::debug!("POST {url}");
        let mut request = self.agent.post(url).set("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.set(name, value);
        }
        Self::finish(request.send_string(body))
    }
}
