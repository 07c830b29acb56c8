//! Payload redaction for lifecycle events.

use orchestra_application::Redactor;
use serde_json::Value;
use std::collections::HashSet;

pub const REDACTED: &str = "[REDACTED]";

/// Masks the values of configured keys anywhere in a payload.
///
/// Key matching is case-insensitive; nested objects and arrays are walked.
#[derive(Debug, Clone, Default)]
pub struct FieldRedactor {
    fields: HashSet<String>,
}

impl FieldRedactor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| f.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn walk(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, inner) in map.iter_mut() {
                    if self.fields.contains(&key.to_lowercase()) {
                        *inner = Value::String(REDACTED.to_string());
                    } else {
                        self.walk(inner);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.walk(item)),
            _ => {}
        }
    }
}

impl Redactor for FieldRedactor {
    fn redact(&self, payload: &mut Value) {
        if !self.fields.is_empty() {
            self.walk(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_application::{CollectingEventSink, EventSink, RedactingEventSink};
    use orchestra_domain::{EventKind, OrchestrationEvent};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_redacts_nested_keys_case_insensitively() {
        let redactor = FieldRedactor::new(["api_key", "Password"]);
        let mut payload = json!({
            "API_KEY": "sk-123",
            "user": {"name": "ada", "password": "hunter2"},
            "items": [{"api_key": "x"}, {"other": 1}]
        });
        redactor.redact(&mut payload);

        assert_eq!(payload["API_KEY"], REDACTED);
        assert_eq!(payload["user"]["password"], REDACTED);
        assert_eq!(payload["user"]["name"], "ada");
        assert_eq!(payload["items"][0]["api_key"], REDACTED);
        assert_eq!(payload["items"][1]["other"], 1);
    }

    #[test]
    fn test_redacting_sink_scrubs_before_forwarding() {
        let inner = Arc::new(CollectingEventSink::new());
        let sink = RedactingEventSink::new(inner.clone(), Arc::new(FieldRedactor::new(["token"])));
        sink.emit(
            OrchestrationEvent::new(EventKind::RunStarted, "t", "r")
                .with_payload(json!({"token": "abc", "tool": "echo"})),
        );

        let events = inner.events();
        assert_eq!(events[0].payload["token"], REDACTED);
        assert_eq!(events[0].payload["tool"], "echo");
    }
}
