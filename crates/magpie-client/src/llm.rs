use std::time::Duration;

use async_trait::async_trait;
use magpie_core::error::AppError;
use magpie_core::llm::{LlmClient, LlmRequest};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible LLM client for structured completions.
///
/// Works with any OpenAI-compatible API, including:
/// - OpenAI directly (`https://api.openai.com/v1`)
/// - Gemini via compatibility layer (`https://generativelanguage.googleapis.com/v1beta/openai`)
///
/// Every completion requests `json_schema` response format and the returned
/// document is validated against the request's schema before being handed
/// back, so callers can deserialize without re-checking shape.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<JsonSchemaWrapper>,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<serde_json::Value, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            response_format: Some(ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: Some(JsonSchemaWrapper {
                    name: request.schema_name.clone(),
                    strict: true,
                    schema: request.schema.clone(),
                }),
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::Network(format!("Connection failed: {}", e))
                } else {
                    AppError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimited);
            }

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status_code, body));

            return Err(AppError::Llm {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::Llm {
            message: format!("Failed to parse LLM response: {}", e),
            status_code: 200,
            retryable: false,
        })?;

        let content_str = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| AppError::Llm {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })?;

        let value: serde_json::Value =
            serde_json::from_str(content_str).map_err(|e| AppError::Llm {
                message: format!("LLM returned invalid JSON: {}. Raw: {}", e, content_str),
                status_code: 200,
                retryable: false,
            })?;

        validate_against_schema(&value, &request.schema)?;
        Ok(value)
    }
}

/// Validate an LLM response document against the schema it was asked for.
fn validate_against_schema(
    value: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), AppError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| AppError::Llm {
        message: format!("Invalid response schema: {}", e),
        status_code: 200,
        retryable: false,
    })?;

    if let Some(error) = validator.iter_errors(value).next() {
        return Err(AppError::Llm {
            message: format!(
                "LLM response violates schema at {}: {}",
                error.instance_path(),
                error
            ),
            status_code: 200,
            retryable: false,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "score": { "type": "integer", "minimum": 0, "maximum": 100 }
            },
            "required": ["score"],
            "additionalProperties": false
        })
    }

    #[test]
    fn valid_document_passes_schema() {
        let doc = json!({ "score": 87 });
        assert!(validate_against_schema(&doc, &score_schema()).is_ok());
    }

    #[test]
    fn out_of_range_document_fails_schema() {
        let doc = json!({ "score": 250 });
        let err = validate_against_schema(&doc, &score_schema()).unwrap_err();
        assert!(matches!(err, AppError::Llm { retryable: false, .. }));
    }

    #[test]
    fn schema_violation_names_the_offending_path() {
        let doc = json!({ "score": "high" });
        let err = validate_against_schema(&doc, &score_schema()).unwrap_err();
        assert!(err.to_string().contains("/score"));
    }

    #[test]
    fn missing_field_fails_schema() {
        let doc = json!({ "rating": 87 });
        assert!(validate_against_schema(&doc, &score_schema()).is_err());
    }
}
