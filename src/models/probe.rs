//! Probe and response types.
//!
//! These types represent the data flowing between the oracle, the
//! dispatcher and the statistics engine. None of them is mutated after
//! creation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An opaque request payload produced by an oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// JSON request body
    Json(serde_json::Value),
    /// Query string appended to the target URL
    Query(String),
}

impl Payload {
    /// Borrow the JSON body, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Query(_) => None,
        }
    }
}

/// The part of an HTTP response the engine and oracles look at.
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    /// HTTP status code (0 when no response was received)
    pub status: u16,
    /// Response body
    pub body: String,
    /// Transport error, when the request failed before a response arrived
    pub error: Option<String>,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            error: None,
        }
    }

    /// A request that never produced a response (timeout, refused, ...).
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: String::new(),
            error: Some(error.into()),
        }
    }

    /// Whether the target rejected the request (4xx/5xx or no response).
    pub fn is_rejected(&self) -> bool {
        self.error.is_some() || self.status >= 400
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// A candidate value paired with the payload that tests it.
#[derive(Debug, Clone)]
pub struct Probe {
    /// The candidate dump value (known value plus one character)
    pub candidate: String,
    /// Payload testing the candidate
    pub payload: Payload,
}

impl Probe {
    pub fn new(candidate: impl Into<String>, payload: Payload) -> Self {
        Self {
            candidate: candidate.into(),
            payload,
        }
    }
}

/// A probe together with the response and the time the request took.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub probe: Probe,
    pub response: ProbeResponse,
    pub elapsed: Duration,
}

impl ProbeResult {
    /// The candidate value this result measured.
    pub fn candidate(&self) -> &str {
        &self.probe.candidate
    }

    /// Elapsed time in seconds.
    pub fn secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}
