//! services/api/src/adapters/ollama.rs
//!
//! This module contains the adapter for the locally hosted Ollama server.
//! It implements the `TextGenerationService` port from the `core` crate by
//! calling `/api/generate` in streaming mode and stitching the fragments together.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use parley_core::ports::TextGenerationService;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One line of the streamed reply. Only the text fragment matters here.
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
}

//=========================================================================================
// Stream Aggregation
//=========================================================================================

/// Collects newline-delimited JSON chunks into a single reply.
///
/// Bytes are buffered until a full line is available, so lines may be split
/// across network reads. Lines that are empty or fail to parse are skipped;
/// text gathered so far is always kept.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    text: String,
    skipped: usize,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw body bytes, consuming every complete line.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.pending.split_to(pos + 1);
            self.scanned = 0;
            self.consume_line(&line[..pos]);
        }
        self.scanned = self.pending.len();
    }

    /// Number of lines dropped because they were not valid chunks.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Processes any unterminated trailing line and returns the reply.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let rest = self.pending.split();
            self.scanned = 0;
            self.consume_line(&rest);
        }
        self.text
    }

    fn consume_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        match serde_json::from_slice::<GenerateChunk>(line) {
            Ok(chunk) => {
                if let Some(fragment) = chunk.response {
                    self.text.push_str(&fragment);
                }
            }
            Err(e) => {
                self.skipped += 1;
                warn!(line_len = line.len(), error = %e, "Skipping malformed stream chunk");
            }
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TextGenerationService` against Ollama's generate API.
#[derive(Clone)]
pub struct OllamaAdapter {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaAdapter {
    /// Creates a new `OllamaAdapter`. `timeout` bounds the whole request, body included.
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn stream_generate(&self, prompt: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let mut accumulator = ReplyAccumulator::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            accumulator.push(&chunk?);
        }

        let skipped = accumulator.skipped();
        let reply = accumulator.finish();
        debug!(reply_len = reply.len(), skipped, "Model stream finished");
        Ok(reply)
    }
}

//=========================================================================================
// `TextGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextGenerationService for OllamaAdapter {
    async fn generate_reply(&self, prompt: &str) -> String {
        match self.stream_generate(prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, model = %self.model, "Inference request failed");
                format!("Error contacting model: {}", e)
            }
        }
    }
}
