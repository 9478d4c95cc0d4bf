use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use specter_core::{CancelToken, ChunkCallback, SpecterError};
use tokio::time::{sleep_until, Instant};

use crate::backend::ByteStream;

/// Timer thresholds for the completion heuristic and the hard ceiling.
///
/// The upstream server does not reliably send `done` for short answers, so
/// the assembler decides on its own after `idle` of silence, and forces
/// completion after a further `grace`. Tests shrink these to milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTiming {
    /// Silence after the last line before the heuristic is consulted.
    pub idle: Duration,
    /// Additional silence after which completion is forced regardless.
    pub grace: Duration,
    /// Hard per-request ceiling, measured from request start.
    pub ceiling: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(2),
            grace: Duration::from_secs(3),
            ceiling: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Line reassembly
// ---------------------------------------------------------------------------

/// Reassembles newline-delimited records from arbitrarily split byte chunks.
/// The trailing incomplete fragment is carried over to the next `push`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound chunk and drain every complete, non-empty line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..=pos);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Drain whatever is left after end-of-input.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

// ---------------------------------------------------------------------------
// Completion heuristic
// ---------------------------------------------------------------------------

fn natural_ending_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]$|```$").expect("valid regex"))
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*```").expect("valid regex"))
}

/// Text-only shape check, tuned for replies expected to run 3-4 lines:
/// several lines ending in terminal punctuation or a closed code fence, a
/// complete fenced code block, or enough raw length to pass as a longer
/// free-form answer.
pub fn response_seems_complete(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let line_count = trimmed.lines().count();
    let natural_ending = natural_ending_re().is_match(trimmed);
    let has_code_block = code_block_re().is_match(trimmed);

    (line_count >= 3 && natural_ending) || (has_code_block && line_count >= 2) || trimmed.len() > 200
}

/// Full completion predicate: the shape check gated by elapsed idle time.
/// Past `idle + grace` of silence any non-empty answer counts as complete.
pub fn looks_complete(text: &str, idle: Duration, timing: &StreamTiming) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    if idle >= timing.idle + timing.grace {
        return true;
    }
    if idle >= timing.idle {
        return response_seems_complete(text);
    }
    false
}

// ---------------------------------------------------------------------------
// Stream driver
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

/// Apply one parsed line to the accumulated answer. Returns true when the
/// line carried an explicit `done` flag. Malformed lines are skipped.
fn apply_line(line: &str, full: &mut String, on_partial: Option<&ChunkCallback>) -> bool {
    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            let preview: String = line.chars().take(100).collect();
            tracing::warn!(error = %e, line = %preview, "skipping malformed stream line");
            return false;
        }
    };

    if let Some(response) = chunk.response {
        if !response.is_empty() {
            full.push_str(&response);
            if let Some(cb) = on_partial {
                cb(full);
            }
        }
    }

    chunk.done.unwrap_or(false)
}

/// Drive a generate byte stream to its single terminal resolution.
///
/// Partial-text callbacks always receive the cumulative answer so far and
/// are strictly monotonic in length. Resolution is exactly one of: explicit
/// `done`, heuristic completion after idle silence, forced completion after
/// the grace period, end-of-input flush, ceiling timeout, cancellation, or
/// a transport error.
pub(crate) async fn assemble_stream(
    stream: ByteStream,
    timing: &StreamTiming,
    started: Instant,
    on_partial: Option<&ChunkCallback>,
    cancel: &CancelToken,
) -> Result<String, SpecterError> {
    let deadline = started + timing.ceiling;
    let mut stream = stream;
    let mut lines = LineAssembler::new();
    let mut full = String::new();
    let mut last_line_at: Option<Instant> = None;

    loop {
        // The heuristic timer is armed only once some answer text exists;
        // before that, only the ceiling bounds the wait.
        let idle_wake = match last_line_at {
            Some(at) if !full.is_empty() => {
                if at.elapsed() < timing.idle {
                    Some(at + timing.idle)
                } else {
                    Some(at + timing.idle + timing.grace)
                }
            }
            _ => None,
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(SpecterError::Cancelled),
            _ = sleep_until(deadline) => {
                return Err(SpecterError::Timeout(
                    "generation did not finish within the request ceiling".to_string(),
                ));
            }
            _ = sleep_until(idle_wake.unwrap_or(deadline)), if idle_wake.is_some() => {
                let idle = last_line_at.expect("idle timer armed").elapsed();
                if looks_complete(&full, idle, timing) {
                    return Ok(full);
                }
            }
            chunk = stream.next() => match chunk {
                None => {
                    if let Some(rest) = lines.finish() {
                        apply_line(&rest, &mut full, on_partial);
                    }
                    return if full.is_empty() {
                        Err(SpecterError::Protocol("no response received".to_string()))
                    } else {
                        Ok(full)
                    };
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(bytes)) => {
                    let complete = lines.push(&bytes);
                    let saw_line = !complete.is_empty();
                    for line in complete {
                        if apply_line(&line, &mut full, on_partial) {
                            return Ok(full);
                        }
                    }
                    if saw_line {
                        last_line_at = Some(Instant::now());
                    }
                }
            }
        }
    }
}
