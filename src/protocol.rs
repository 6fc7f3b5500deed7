//! Wire format shared by the producer and the consumer.
//!
//! Every event travels as one `data: <payload>` line followed by a blank
//! line. The payload is either a JSON object `{"token": "..."}` or the
//! literal [`DONE`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::pacing::Pacing;

/// Marker that starts every data line.
pub const DATA_PREFIX: &str = "data:";
/// Payload of the terminal event.
pub const DONE: &str = "[DONE]";

/// One fully resolved producer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub text: String,
    pub chunk_size: usize,
    pub avg_delay_ms: f64,
    pub delay_jitter_ms: f64,
}

impl StreamRequest {
    /// A request with the default pacing of [`StreamDefaults`].
    pub fn new(text: impl Into<String>) -> Self {
        StreamDefaults::default().resolve(RequestBody {
            text: Some(text.into()),
            ..RequestBody::default()
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_pacing(mut self, avg_delay_ms: f64, delay_jitter_ms: f64) -> Self {
        self.avg_delay_ms = avg_delay_ms;
        self.delay_jitter_ms = delay_jitter_ms;
        self
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(self.avg_delay_ms, self.delay_jitter_ms)
    }
}

/// Request body as it arrives over HTTP: every field may be missing.
///
/// Older clients sent `prompt`, `avgDelay` and `delayVariance`; those names
/// are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(default, alias = "prompt")]
    pub text: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<i64>,
    #[serde(default, alias = "avgDelay")]
    pub avg_delay_ms: Option<f64>,
    #[serde(default, alias = "delayVariance")]
    pub delay_jitter_ms: Option<f64>,
}

/// Values used for fields missing from a [`RequestBody`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDefaults {
    pub chunk_size: usize,
    pub avg_delay_ms: f64,
    pub delay_jitter_ms: f64,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            chunk_size: 1,
            avg_delay_ms: 30.0,
            delay_jitter_ms: 0.0,
        }
    }
}

impl StreamDefaults {
    /// Fill in missing fields and clamp the rest into their valid ranges.
    ///
    /// Chunk sizes below one become one; negative or non-finite delays fall
    /// back to zero and the default respectively.
    pub fn resolve(&self, body: RequestBody) -> StreamRequest {
        let chunk_size = body
            .chunk_size
            .map(|n| usize::try_from(n.max(1)).unwrap_or(usize::MAX))
            .unwrap_or(self.chunk_size)
            .max(1);
        let delay = |value: Option<f64>, fallback: f64| match value {
            Some(v) if v.is_finite() => v.max(0.0),
            _ => fallback.max(0.0),
        };
        StreamRequest {
            text: body.text.unwrap_or_default(),
            chunk_size,
            avg_delay_ms: delay(body.avg_delay_ms, self.avg_delay_ms),
            delay_jitter_ms: delay(body.delay_jitter_ms, self.delay_jitter_ms),
        }
    }
}

/// JSON object carried by a data line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token: String,
}

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A group of tokens.
    Data(String),
    /// Normal end of the stream.
    Done,
}

impl StreamEvent {
    /// Encode the event as an `event-stream` frame.
    pub fn to_frame(&self) -> Bytes {
        match self {
            StreamEvent::Data(token) => {
                // Serializing a plain string field cannot fail.
                let json = serde_json::to_string(&TokenPayload {
                    token: token.clone(),
                })
                .unwrap_or_default();
                Bytes::from(format!("{DATA_PREFIX} {json}\n\n"))
            }
            StreamEvent::Done => Bytes::from(format!("{DATA_PREFIX} {DONE}\n\n")),
        }
    }
}

/// Classification of one complete line read by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Blank, or not a data line.
    Ignored,
    /// The terminal sentinel.
    Done,
    /// A well-formed data line.
    Data { raw: String, token: String },
    /// A data line whose payload could not be decoded.
    Malformed { raw: String, reason: String },
}

/// Classify one complete line.
///
/// ```
/// use stream_lab::protocol::{parse_line, Line};
///
/// assert_eq!(parse_line("data: [DONE]"), Line::Done);
/// assert_eq!(parse_line(": keep-alive"), Line::Ignored);
/// ```
pub fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix(DATA_PREFIX) else {
        return Line::Ignored;
    };
    let payload = rest.trim();
    if payload == DONE {
        return Line::Done;
    }
    match serde_json::from_str::<TokenPayload>(payload) {
        Ok(TokenPayload { token }) => Line::Data {
            raw: payload.to_string(),
            token,
        },
        Err(e) => Line::Malformed {
            raw: payload.to_string(),
            reason: e.to_string(),
        },
    }
}
