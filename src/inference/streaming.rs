//! NDJSON streaming response decoder for `/api/generate`.
//!
//! Reads the response body as a byte stream, splits it on `\n`, parses each
//! line as one generation chunk and accumulates the reply text. Lines are cut
//! from a byte buffer before UTF-8 decoding, so a multi-byte character split
//! across two network chunks still decodes cleanly.

use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{FinalStats, GenerateOutcome, StreamChunk};

// ─── Line parser ─────────────────────────────────────────────────────────────

/// Raw shape of one streamed line. `done` is mandatory.
#[derive(Debug, Deserialize)]
struct GenerateLine {
    done: bool,
    #[serde(default)]
    response: String,
    #[serde(flatten)]
    stats: FinalStats,
}

/// Parse a single NDJSON line into a [`StreamChunk`].
pub fn parse_generate_line(line: &str) -> Result<StreamChunk, InferenceError> {
    let parsed: GenerateLine =
        serde_json::from_str(line).map_err(|e| InferenceError::MalformedStreamLine {
            line: line.to_string(),
            reason: e.to_string(),
        })?;

    if parsed.done {
        Ok(StreamChunk::Final(parsed.stats))
    } else {
        Ok(StreamChunk::Partial {
            text: parsed.response,
        })
    }
}

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// Incremental decoder state for one response body.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    /// Bytes after the last newline seen so far.
    buffer: Vec<u8>,
    /// Accumulated reply text.
    text: String,
    seen_fragment: bool,
    stats: Option<FinalStats>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the terminal chunk has been seen.
    pub fn has_final(&self) -> bool {
        self.stats.is_some()
    }

    /// Append received bytes and process every complete line.
    ///
    /// Stops at the first bad line; lines after it are never looked at.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), InferenceError> {
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            self.process_line(&line)?;
        }

        Ok(())
    }

    /// End of input: return the outcome, or `MissingFinalChunk` if no
    /// terminal chunk arrived.
    ///
    /// Bytes after the last newline never formed a complete line and are
    /// dropped unparsed.
    pub fn finish(self) -> Result<GenerateOutcome, InferenceError> {
        if !self.buffer.is_empty() {
            tracing::debug!(
                bytes = self.buffer.len(),
                "discarding unterminated trailing line"
            );
        }

        match self.stats {
            Some(stats) => Ok(GenerateOutcome {
                text: self.text,
                stats,
            }),
            None => Err(InferenceError::MissingFinalChunk),
        }
    }

    fn process_line(&mut self, line: &str) -> Result<(), InferenceError> {
        let chunk = parse_generate_line(line).inspect_err(|e| {
            tracing::warn!(error = %e, "malformed line in generate stream");
        })?;

        match chunk {
            StreamChunk::Partial { text } => {
                if self.seen_fragment {
                    self.text.push_str(&text);
                } else {
                    self.text.push_str(text.trim_start());
                    self.seen_fragment = true;
                }
            }
            StreamChunk::Final(stats) => {
                tracing::debug!(
                    eval_count = stats.eval_count,
                    eval_duration = stats.eval_duration,
                    total_duration = stats.total_duration,
                    "received final generate chunk"
                );
                self.stats = Some(stats);
            }
        }

        Ok(())
    }
}

// ─── Stream driver ───────────────────────────────────────────────────────────

/// Drain `byte_stream` in order, calling `on_partial` with the accumulated
/// reply after every received chunk.
///
/// A failing stream item ends the decode with `StreamError`; whatever
/// `on_partial` already saw stays the caller's last good state.
pub async fn decode_generate_stream<S, B, E, F>(
    byte_stream: S,
    mut on_partial: F,
) -> Result<GenerateOutcome, InferenceError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&str),
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut decoder = NdjsonDecoder::new();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = chunk.map_err(|e| InferenceError::StreamError {
            reason: format!("stream read error: {e}"),
        })?;
        decoder.push(bytes.as_ref())?;
        on_partial(decoder.text());
    }

    decoder.finish()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
