//! JSON templates with a single placeholder.
//!
//! A template is parsed once at construction; a missing placeholder fails
//! with `InvalidOption` before any request is sent. The placeholder may sit
//! inside a JSON string (`"startsWith": "{ORM_LEAK}"`) or stand in for a
//! whole JSON value (`{"query": {PAYLOAD}}`).

use crate::models::{OrmLeakError, Result, TemplateSource};
use serde_json::{Map, Value};

pub const ORM_LEAK: &str = "{ORM_LEAK}";
pub const PAYLOAD: &str = "{PAYLOAD}";
pub const RANDOM_STRING: &str = "{RANDOM_STRING}";

#[derive(Debug, Clone)]
pub struct JsonTemplate {
    placeholder: &'static str,
    tree: Value,
}

impl JsonTemplate {
    /// Parse a template, checking that it carries `placeholder`.
    pub fn parse(option: &str, text: &str, placeholder: &'static str) -> Result<Self> {
        if !text.contains(placeholder) {
            return Err(OrmLeakError::InvalidOption {
                option: option.to_string(),
                placeholder: placeholder.to_string(),
            });
        }

        let tree = match serde_json::from_str(text) {
            Ok(tree) => tree,
            Err(_) => {
                // bare placeholder standing in for a JSON value
                let quoted = text.replace(placeholder, &format!("\"{placeholder}\""));
                serde_json::from_str(&quoted)
                    .map_err(|e| OrmLeakError::ParseError(format!("{option}: {e}")))?
            }
        };

        Ok(Self { placeholder, tree })
    }

    /// Load and parse a template from an inline value or a file.
    pub fn load(option: &str, source: &TemplateSource, placeholder: &'static str) -> Result<Self> {
        let text = source.load()?;
        Self::parse(option, &text, placeholder)
    }

    /// Substitute `text` wherever the placeholder appears in a string.
    pub fn with_str(&self, text: &str) -> Value {
        self.render(&self.tree, &|s: &str| {
            Value::String(s.replace(self.placeholder, text))
        })
    }

    /// Substitute `value` for strings consisting of the placeholder alone.
    pub fn with_value(&self, value: &Value) -> Value {
        self.render(&self.tree, &|s: &str| {
            if s == self.placeholder {
                value.clone()
            } else {
                Value::String(s.to_string())
            }
        })
    }

    fn render(&self, node: &Value, on_str: &dyn Fn(&str) -> Value) -> Value {
        match node {
            Value::String(s) if s.contains(self.placeholder) => on_str(s),
            Value::Array(items) => Value::Array(
                items.iter().map(|item| self.render(item, on_str)).collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(v, on_str)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_placeholder_is_invalid_option() {
        let err = JsonTemplate::parse("leak query", r#"{"a": 1}"#, ORM_LEAK).unwrap_err();
        match err {
            OrmLeakError::InvalidOption { option, placeholder } => {
                assert_eq!(option, "leak query");
                assert_eq!(placeholder, ORM_LEAK);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_inside_string() {
        let t = JsonTemplate::parse("q", r#"{"pw": {"startsWith": "x{ORM_LEAK}"}}"#, ORM_LEAK).unwrap();
        assert_eq!(t.with_str("a\"b"), json!({"pw": {"startsWith": "xa\"b"}}));
    }

    #[test]
    fn test_bare_placeholder_takes_a_value() {
        let t = JsonTemplate::parse("base", r#"{"query": {PAYLOAD}, "take": 1}"#, PAYLOAD).unwrap();
        assert_eq!(
            t.with_value(&json!({"OR": []})),
            json!({"query": {"OR": []}, "take": 1})
        );
    }

    #[test]
    fn test_unparseable_template() {
        let err = JsonTemplate::parse("base", "{PAYLOAD", PAYLOAD).unwrap_err();
        assert!(matches!(err, OrmLeakError::ParseError(_)));
    }
}
