//! Wire messages for the shot service.
//!
//! JSON-over-newline: each request is a single line of JSON followed by `\n`
//! and is answered by exactly one reply line.

use serde::{Deserialize, Serialize};

use lb_types::{ResolvedTarget, ShotError, ShotResult};

/// Longest request line the service will decode, line ending excluded.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Strip the line ending from a raw request line and check it is a
/// size-bounded UTF-8 string.
pub fn request_line(raw: &[u8]) -> ShotResult<&str> {
    let body = raw.strip_suffix(b"\n").unwrap_or(raw);
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    if body.len() > MAX_REQUEST_BYTES {
        return Err(ShotError::Malformed {
            message: format!("request too large: {} bytes", body.len()),
        });
    }
    std::str::from_utf8(body).map_err(|e| ShotError::Malformed {
        message: format!("request is not valid UTF-8: {e}"),
    })
}

/// One `(group, variable, value)` assignment applied to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub group: String,
    pub variable: String,
    pub value: f64,
}

impl From<ResolvedTarget> for Substitution {
    fn from(target: ResolvedTarget) -> Self {
        Self {
            group: target.group,
            variable: target.variable,
            value: target.value,
        }
    }
}

/// What the service does with a compiled artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Compile and submit one trial.
    #[default]
    Trial,
    /// Write the best values of a finished session; nothing is submitted.
    Best,
}

/// Request to produce one trial, or the best values of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRequest {
    #[serde(default)]
    pub kind: RequestKind,
    /// Template artifact path
    pub template: String,
    /// Folder the derived artifact is written to
    pub output_folder: String,
    pub substitutions: Vec<Substitution>,
    pub trial_number: u64,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ShotRequest {
    pub fn decode(line: &str) -> ShotResult<Self> {
        let line = request_line(line.as_bytes())?;
        serde_json::from_str(line.trim()).map_err(|e| ShotError::Malformed {
            message: e.to_string(),
        })
    }

    pub fn encode(&self) -> ShotResult<String> {
        serde_json::to_string(self).map_err(|e| ShotError::Malformed {
            message: e.to_string(),
        })
    }
}

/// Reply to a [`ShotRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShotReply {
    /// Parameters received; the artifact has been handed off
    Ack { message: String, artifact: String },

    /// The request failed; the service keeps listening
    Error { message: String },
}

impl ShotReply {
    pub fn ack(artifact: impl Into<String>) -> Self {
        Self::Ack {
            message: "Experiment parameters received".to_string(),
            artifact: artifact.into(),
        }
    }

    pub fn error(err: &ShotError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        // a reply holds only strings, serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"Error","message":"encode"}"#.to_string())
    }
}
