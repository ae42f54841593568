//! Streamed chat client
//!
//! POSTs a chat request and pumps the `text/event-stream` response through the
//! reassembler and decoder, forwarding each frame as soon as it decodes.

use std::ops::ControlFlow;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{DecodeError, StreamError};
use super::frame::{StreamFrame, decode, decode_final};
use super::reassembler::ChunkReassembler;
use crate::config::ServerConfig;
use crate::http;

/// Body of a chat request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
        }
    }
}

/// What happened over one streamed response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Frames delivered to the receiver, the sentinel included
    pub frames: usize,
    /// Lines that failed to decode, in arrival order
    pub decode_errors: Vec<DecodeError>,
    /// Whether `[DONE]` arrived
    pub sentinel_seen: bool,
    /// Whether the receiver went away before the stream ended
    pub cancelled: bool,
}

impl StreamSummary {
    async fn forward(
        &mut self,
        decoded: Result<Option<StreamFrame>, DecodeError>,
        tx: &mpsc::Sender<StreamFrame>,
    ) -> ControlFlow<()> {
        match decoded {
            Ok(None) => ControlFlow::Continue(()),
            Ok(Some(frame)) => {
                let end = frame == StreamFrame::EndOfStream;
                if tx.send(frame).await.is_err() {
                    debug!("forward: receiver dropped");
                    self.cancelled = true;
                    return ControlFlow::Break(());
                }
                self.frames += 1;
                if end {
                    self.sentinel_seen = true;
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
            Err(e) => {
                warn!(error = %e, "forward: skipping undecodable line");
                self.decode_errors.push(e);
                ControlFlow::Continue(())
            }
        }
    }
}

/// Drive a chunk stream to completion, sending decoded frames to `tx`
///
/// Stops at the `[DONE]` sentinel, at the end of the chunk stream, or as soon
/// as the receiver is dropped. A transport error ends the pump with that error.
pub async fn pump<S, B, E>(chunks: S, tx: &mpsc::Sender<StreamFrame>) -> Result<StreamSummary, StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
{
    debug!("pump: called");
    let mut chunks = std::pin::pin!(chunks);
    let mut reassembler = ChunkReassembler::new();
    let mut summary = StreamSummary::default();

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("pump: receiver closed while waiting for data");
                summary.cancelled = true;
                return Ok(summary);
            }
            next = chunks.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(Into::into)?;

        for line in reassembler.feed(chunk.as_ref()) {
            if summary.forward(decode(&line), tx).await.is_break() {
                return Ok(summary);
            }
        }
    }

    if let Some(fragment) = reassembler.finish() {
        let _ = summary.forward(decode_final(&fragment), tx).await;
    }

    if !summary.sentinel_seen {
        info!(frames = summary.frames, "pump: stream closed without end-of-stream sentinel");
    }
    Ok(summary)
}

/// HTTP client for the streamed chat endpoint
pub struct ChatClient {
    http: Client,
    url: String,
    token: Option<String>,
}

impl ChatClient {
    pub fn new(url: impl Into<String>, token: Option<String>, connect_timeout: Duration) -> Result<Self, StreamError> {
        let url = url.into();
        debug!(%url, has_token = token.is_some(), "ChatClient::new: called");
        Ok(Self {
            http: http::build_client(connect_timeout)?,
            url,
            token,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, StreamError> {
        Self::new(config.url(&config.chat_path), config.token(), config.timeout())
    }

    /// Send `request` and stream the response frames into `tx`
    pub async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamFrame>,
    ) -> Result<StreamSummary, StreamError> {
        debug!(url = %self.url, "stream: called");
        let mut builder = self
            .http
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = http::retry_after(response.headers());
            debug!(?retry_after, "stream: rate limited (429)");
            return Err(StreamError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "stream: unauthorized");
            return Err(StreamError::Unauthorized { status, message });
        }

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "stream: API error");
            return Err(StreamError::ApiError { status, message });
        }

        let summary = pump(response.bytes_stream(), &tx).await?;
        info!(
            frames = summary.frames,
            decode_errors = summary.decode_errors.len(),
            sentinel = summary.sentinel_seen,
            "stream: done"
        );
        Ok(summary)
    }
}
