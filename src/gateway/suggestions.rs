//! Suggestion gateway
//!
//! Fetches reply suggestions for a thread from the configured webhook and
//! normalizes its envelope. The webhook answers with
//! `[{ thread_id, based_on_mid, suggestions, generated_at }]` where
//! `suggestions` is either a native array or a string holding a
//! JSON-encoded array. Both encodings are accepted.

use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use crate::config::SuggestionConfig;
use crate::error::{Result, SalesdeskError};
use crate::models::{Suggestion, SuggestionBatch, SuggestionType};

/// HTTP client for the suggestion webhook
#[derive(Clone)]
pub struct SuggestionGateway {
    client: Client,
    config: SuggestionConfig,
}

impl SuggestionGateway {
    /// Create a gateway
    ///
    /// Missing webhook settings are accepted here and reported by
    /// [`get_suggestion`](Self::get_suggestion).
    ///
    /// # Errors
    ///
    /// Returns `Config` if the timeout is zero, or an error if HTTP client
    /// initialization fails
    pub fn new(config: SuggestionConfig) -> Result<Self> {
        if config.timeout_seconds == 0 {
            return Err(SalesdeskError::Config(
                "suggestions.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("salesdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SalesdeskError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Endpoint URL with the `thread_id` query parameter appended
    fn request_url(&self, thread_id: &str) -> Result<Url> {
        let base = self
            .config
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SalesdeskError::Config("suggestion webhook URL is not set".to_string()))?;
        let mut url = Url::parse(base).map_err(|e| {
            SalesdeskError::Config(format!("invalid suggestion webhook URL {}: {}", base, e))
        })?;
        url.query_pairs_mut().append_pair("thread_id", thread_id);
        Ok(url)
    }

    fn auth_token(&self) -> Result<&str> {
        self.config
            .auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SalesdeskError::Config("suggestion webhook token is not set".to_string()))
            .map_err(Into::into)
    }

    /// Request one suggestion batch for `thread_id`
    ///
    /// # Errors
    ///
    /// - `Config` when the URL or token is missing (no request is made)
    /// - `Transport` on connection failure, timeout or a non-success status
    /// - `InvalidResponse` when the body is not a non-empty JSON array
    pub async fn get_suggestion(&self, thread_id: &str) -> Result<SuggestionBatch> {
        let url = self.request_url(thread_id)?;
        let token = self.auth_token()?;

        tracing::debug!(thread_id, "requesting suggestions");
        let response = self
            .client
            .get(url)
            .header("Authorization", token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Suggestion request failed: {}", e);
                if e.is_timeout() {
                    SalesdeskError::Transport("suggestion request timed out".to_string())
                } else {
                    SalesdeskError::Transport(format!("Failed to reach suggestion webhook: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("Suggestion webhook returned error {}", status);
            return Err(SalesdeskError::Transport(format!(
                "Failed to get suggestions: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ))
            .into());
        }

        let body = response.text().await.map_err(|e| {
            SalesdeskError::Transport(format!("Failed to read suggestion response: {}", e))
        })?;
        let envelope: Value = serde_json::from_str(&body).map_err(|e| {
            SalesdeskError::InvalidResponse(format!("response is not JSON: {}", e))
        })?;

        let mut batch = normalize_envelope(envelope)?;
        if batch.thread_id.is_empty() {
            batch.thread_id = thread_id.to_string();
        }
        tracing::debug!(
            thread_id,
            based_on_mid = %batch.based_on_mid,
            count = batch.suggestions.len(),
            "suggestions received"
        );
        Ok(batch)
    }
}

/// Normalize a webhook envelope into a [`SuggestionBatch`]
///
/// # Errors
///
/// Returns `InvalidResponse` if the envelope is not a non-empty array whose
/// first element is an object. Problems inside the `suggestions` field never
/// fail: they yield an empty list (with `decode_error` set when a string
/// payload could not be decoded).
///
/// # Examples
///
/// ```
/// use salesdesk::gateway::normalize_envelope;
/// use serde_json::json;
///
/// let batch = normalize_envelope(json!([{
///     "thread_id": "t1",
///     "based_on_mid": "m9",
///     "generated_at": "2024-05-01T10:00:00Z",
///     "suggestions": "[{\"id\":\"1\",\"type\":\"offer\",\"message\":\"m\",\"rationale\":\"r\"}]"
/// }]))
/// .unwrap();
/// assert_eq!(batch.suggestions.len(), 1);
/// ```
pub fn normalize_envelope(envelope: Value) -> Result<SuggestionBatch> {
    let first = match envelope {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        _ => {
            return Err(SalesdeskError::InvalidResponse(
                "expected array with at least one item".to_string(),
            )
            .into())
        }
    };
    let obj = match first {
        Value::Object(obj) => obj,
        other => {
            return Err(SalesdeskError::InvalidResponse(format!(
                "expected envelope object, got {}",
                other
            ))
            .into())
        }
    };

    let (suggestions, decode_error) = normalize_suggestions(obj.get("suggestions"));

    Ok(SuggestionBatch {
        thread_id: text_field(&obj, "thread_id").unwrap_or_default(),
        based_on_mid: text_field(&obj, "based_on_mid").unwrap_or_default(),
        generated_at: text_field(&obj, "generated_at").unwrap_or_default(),
        suggestions,
        decode_error,
    })
}

fn normalize_suggestions(raw: Option<&Value>) -> (Vec<Suggestion>, Option<String>) {
    match raw {
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(items)) => (map_suggestions(&items), None),
            Ok(other) => {
                let msg = format!("encoded suggestions are not an array: {}", other);
                tracing::warn!("{}", msg);
                (Vec::new(), Some(msg))
            }
            Err(e) => {
                let msg = format!("failed to parse encoded suggestions: {}", e);
                tracing::warn!("{}", msg);
                (Vec::new(), Some(msg))
            }
        },
        Some(Value::Array(items)) => (map_suggestions(items), None),
        _ => (Vec::new(), None),
    }
}

fn map_suggestions(items: &[Value]) -> Vec<Suggestion> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match item {
            Value::Object(obj) => Some(Suggestion {
                id: text_field(obj, "id").unwrap_or_else(|| format!("suggestion-{}", index)),
                suggestion_type: text_field(obj, "type")
                    .map(|t| SuggestionType::from_wire(&t))
                    .unwrap_or_default(),
                message: text_field(obj, "message").unwrap_or_default(),
                rationale: text_field(obj, "rationale").unwrap_or_default(),
            }),
            _ => None,
        })
        .collect()
}

/// String or number field rendered as text; `None` if absent or null
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(suggestions: Value) -> Value {
        json!([{
            "thread_id": "t1",
            "based_on_mid": "m42",
            "generated_at": "2024-05-01T10:00:00Z",
            "suggestions": suggestions
        }])
    }

    #[test]
    fn test_string_and_array_encodings_are_equivalent() {
        let native = json!([{"id":"1","type":"offer","message":"m","rationale":"r"}]);
        let encoded = Value::String(native.to_string());

        let from_string = normalize_envelope(envelope(encoded)).unwrap();
        let from_array = normalize_envelope(envelope(native)).unwrap();

        assert_eq!(from_string, from_array);
        assert_eq!(
            from_array.suggestions,
            vec![Suggestion {
                id: "1".into(),
                suggestion_type: SuggestionType::Offer,
                message: "m".into(),
                rationale: "r".into(),
            }]
        );
        assert_eq!(from_array.based_on_mid, "m42");
    }

    #[test]
    fn test_null_suggestions_yield_empty_list() {
        let batch = normalize_envelope(envelope(Value::Null)).unwrap();
        assert!(batch.suggestions.is_empty());
        assert!(batch.decode_error.is_none());
    }

    #[test]
    fn test_other_types_yield_empty_list() {
        for raw in [json!(7), json!({"id": "1"}), json!(true)] {
            let batch = normalize_envelope(envelope(raw)).unwrap();
            assert!(batch.suggestions.is_empty());
        }
        let mut missing = envelope(Value::Null);
        missing[0].as_object_mut().unwrap().remove("suggestions");
        assert!(normalize_envelope(missing).unwrap().suggestions.is_empty());
    }

    #[test]
    fn test_malformed_string_degrades_to_empty_list() {
        let batch = normalize_envelope(envelope(json!("[{\"id\": "))).unwrap();
        assert!(batch.suggestions.is_empty());
        assert!(batch.decode_error.is_some());

        let batch = normalize_envelope(envelope(json!("{\"id\": \"1\"}"))).unwrap();
        assert!(batch.suggestions.is_empty());
        assert!(batch.decode_error.is_some());
    }

    #[test]
    fn test_defaults_for_missing_fields_and_dropped_nulls() {
        let batch = normalize_envelope(envelope(json!([
            null,
            {"message": "hi"},
            {"id": 7, "type": "qualify"},
            "stray",
        ])))
        .unwrap();

        assert_eq!(batch.suggestions.len(), 2);
        assert_eq!(batch.suggestions[0].id, "suggestion-1");
        assert_eq!(batch.suggestions[0].suggestion_type, SuggestionType::Discovery);
        assert_eq!(batch.suggestions[0].message, "hi");
        assert_eq!(batch.suggestions[0].rationale, "");
        assert_eq!(batch.suggestions[1].id, "7");
        assert_eq!(batch.suggestions[1].suggestion_type, SuggestionType::Qualify);
        assert_eq!(batch.suggestions[1].message, "");
    }

    #[test]
    fn test_envelope_shape_errors_are_hard_failures() {
        for bad in [json!([]), json!({"suggestions": []}), Value::Null, json!(["x"])] {
            let err = normalize_envelope(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SalesdeskError>(),
                Some(SalesdeskError::InvalidResponse(_))
            ));
        }
    }

    #[test]
    fn test_only_first_element_is_used() {
        let mut env = envelope(json!([{"id": "a"}]));
        env.as_array_mut()
            .unwrap()
            .push(json!({"thread_id": "other", "suggestions": [{"id": "b"}]}));
        let batch = normalize_envelope(env).unwrap();
        assert_eq!(batch.thread_id, "t1");
        assert_eq!(batch.suggestions[0].id, "a");
    }

    #[tokio::test]
    async fn test_missing_configuration_fails_fast() {
        let gw = SuggestionGateway::new(SuggestionConfig::default()).unwrap();
        let err = gw.get_suggestion("t1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SalesdeskError>(),
            Some(SalesdeskError::Config(_))
        ));

        let gw = SuggestionGateway::new(SuggestionConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            auth_token: None,
            ..Default::default()
        })
        .unwrap();
        let err = gw.get_suggestion("t1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SalesdeskError>(),
            Some(SalesdeskError::Config(_))
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = SuggestionGateway::new(SuggestionConfig {
            timeout_seconds: 0,
            ..Default::default()
        });
        let err = result.err().expect("zero timeout accepted");
        assert!(matches!(
            err.downcast_ref::<SalesdeskError>(),
            Some(SalesdeskError::Config(_))
        ));
    }

    #[test]
    fn test_request_url_encodes_thread_id() {
        let gw = SuggestionGateway::new(SuggestionConfig {
            webhook_url: Some("https://hooks.example.com/webhook/suggest".into()),
            auth_token: Some("tok".into()),
            ..Default::default()
        })
        .unwrap();
        let url = gw.request_url("t 1&x").unwrap();
        assert_eq!(
            url.as_str(),
            "https://hooks.example.com/webhook/suggest?thread_id=t+1%26x"
        );
    }
}
