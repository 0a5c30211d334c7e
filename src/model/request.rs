use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProxyError;

pub const PROMPT_INVALID: &str = "Invalid or empty prompt.";
pub const MODEL_INVALID: &str = "Invalid or empty model.";

/// A validated `POST /api/completion` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
}

/// Body as received on the wire. Fields are kept loosely typed so that a
/// missing field or a non-string value is reported as a 400 with our own
/// message instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CompletionRequestBody {
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub model: Option<Value>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
        }
    }
}

impl CompletionRequestBody {
    pub fn validate(self) -> Result<CompletionRequest, ProxyError> {
        let prompt = non_blank(self.prompt).ok_or_else(|| ProxyError::validation(PROMPT_INVALID))?;
        let model = non_blank(self.model).ok_or_else(|| ProxyError::validation(MODEL_INVALID))?;
        Ok(CompletionRequest { prompt, model })
    }
}

fn non_blank(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn body(value: Value) -> CompletionRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_prompt_and_model() {
        let req = body(json!({"prompt": "Hi", "model": "m"})).validate().unwrap();
        assert_eq!(req, CompletionRequest::new("Hi", "m"));
    }

    #[test]
    fn keeps_prompt_whitespace_untouched() {
        let req = body(json!({"prompt": "  Hi\n", "model": "m"})).validate().unwrap();
        assert_eq!(req.prompt, "  Hi\n");
    }

    #[test]
    fn rejects_missing_or_blank_prompt() {
        for value in [
            json!({"model": "m"}),
            json!({"prompt": "", "model": "m"}),
            json!({"prompt": "   \t", "model": "m"}),
            json!({"prompt": 42, "model": "m"}),
            json!({"prompt": null, "model": "m"}),
        ] {
            let err = body(value).validate().unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation);
            assert_eq!(err.message, PROMPT_INVALID);
        }
    }

    #[test]
    fn rejects_missing_or_blank_model() {
        for value in [
            json!({"prompt": "Hi"}),
            json!({"prompt": "Hi", "model": ""}),
            json!({"prompt": "Hi", "model": " "}),
            json!({"prompt": "Hi", "model": ["m"]}),
        ] {
            let err = body(value).validate().unwrap_err();
            assert_eq!(err.message, MODEL_INVALID);
        }
    }
}
