//! Event transport - opens the server-push stream

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;
use crate::http;

/// Raw chunks of one open connection, in arrival order
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Errors opening or reading the event stream
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Connection closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Authentication failures are not worth retrying forever
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }
}

/// Source of live event connections
///
/// Each `open` starts a fresh connection; the bus calls it again after the
/// previous stream ends or fails.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<ChunkStream, TransportError>;
}

/// `text/event-stream` over HTTP GET
pub struct HttpEventTransport {
    http: Client,
    url: String,
    token: Option<String>,
}

impl HttpEventTransport {
    pub fn new(url: impl Into<String>, token: Option<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let url = url.into();
        debug!(%url, has_token = token.is_some(), "HttpEventTransport::new: called");
        Ok(Self {
            http: http::build_client(connect_timeout)?,
            url,
            token,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, TransportError> {
        Self::new(config.url(&config.events_path), config.token(), config.timeout())
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn open(&self) -> Result<ChunkStream, TransportError> {
        debug!(url = %self.url, "open: called");
        let mut request = self.http.get(&self.url).header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "open: unauthorized");
            return Err(TransportError::Unauthorized { status, message });
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "open: unexpected status");
            return Err(TransportError::Status { status, message });
        }

        debug!("open: stream established");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from))
            .boxed())
    }
}
