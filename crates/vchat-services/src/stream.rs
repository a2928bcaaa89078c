//! Streaming response consumer
//!
//! Turns a newline-delimited `data: <json>` event stream into text deltas.
//! Lines split across chunks are buffered until complete, malformed
//! fragments are skipped, and a `data: [DONE]` line ends the stream.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vchat_core::{Result, StreamFragment};

use crate::ChunkStream;

pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// Extracts `data:` payloads from complete lines
///
/// Bytes are buffered until a newline arrives, so neither a line nor a
/// multi-byte character split across chunks is ever parsed in pieces.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let payload = line.trim().strip_prefix(DATA_PREFIX)?;
    Some(payload.trim().to_string())
}

/// Approximate token count, ~4 characters per token rounded up
pub fn estimate_tokens(text: &str) -> u32 {
    text.len().div_ceil(4) as u32
}

/// Stateful parser from delivery chunks to text deltas
#[derive(Debug, Default)]
pub struct DeltaConsumer {
    decoder: SseDecoder,
    text: String,
    usage: Option<u32>,
    done: bool,
    skipped: usize,
}

impl DeltaConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the deltas it completed in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let payloads = self.decoder.push(chunk);
        self.apply(payloads)
    }

    /// Flush whatever the stream left buffered when it closed
    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let payloads = self.decoder.finish();
        self.apply(payloads)
    }

    fn apply(&mut self, payloads: Vec<String>) -> Vec<String> {
        let mut deltas = Vec::new();

        for payload in payloads {
            if payload == DONE_SENTINEL {
                self.done = true;
                break;
            }

            let fragment = match serde_json::from_str::<StreamFragment>(&payload) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed stream fragment");
                    self.skipped += 1;
                    continue;
                }
            };

            if let Some(total) = fragment.total_tokens() {
                self.usage = Some(total);
            }

            match fragment.text() {
                Some(text) if !text.is_empty() => {
                    self.text.push_str(text);
                    deltas.push(text.to_string());
                }
                _ => {}
            }
        }

        deltas
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Reported usage if the stream carried one, otherwise an estimate
    pub fn token_count(&self) -> u32 {
        self.usage.unwrap_or_else(|| estimate_tokens(&self.text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// `data: [DONE]` was received
    Sentinel,
    /// The body ended without a sentinel
    Closed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub end: StreamEnd,
    pub token_count: u32,
    pub skipped: usize,
}

/// Drive a chunk stream to completion, handing each delta to `on_delta`
///
/// Cancellation is checked before every chunk and ends consumption cleanly.
/// A transport error mid-stream is returned as an error.
pub async fn consume_stream<F>(
    mut chunks: ChunkStream,
    cancel: &CancellationToken,
    mut on_delta: F,
) -> Result<StreamSummary>
where
    F: FnMut(&str),
{
    let mut consumer = DeltaConsumer::new();

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for delta in consumer.feed(&bytes) {
                    on_delta(&delta);
                }
                if consumer.is_done() {
                    break StreamEnd::Sentinel;
                }
            }
            Some(Err(e)) => return Err(e),
            None => {
                for delta in consumer.finish() {
                    on_delta(&delta);
                }
                break if consumer.is_done() {
                    StreamEnd::Sentinel
                } else {
                    StreamEnd::Closed
                };
            }
        }
    };

    debug!(?end, chars = consumer.text().len(), skipped = consumer.skipped(), "Stream finished");

    Ok(StreamSummary {
        end,
        token_count: consumer.token_count(),
        skipped: consumer.skipped(),
    })
}
