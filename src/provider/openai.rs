// src/provider/openai.rs — OpenAI Chat Completions provider

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelProvider, Role, StopReason, TokenUsage};
use crate::infra::errors::DeskError;

pub struct OpenAIProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1".into())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Request body for `/chat/completions`.
pub(crate) fn build_body(request: &ChatRequest) -> serde_json::Value {
    let mut msgs = Vec::new();
    if let Some(system) = &request.system {
        msgs.push(serde_json::json!({"role": "system", "content": system}));
    }
    for m in &request.messages {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        msgs.push(serde_json::json!({"role": role, "content": m.content}));
    }

    let mut body = serde_json::json!({
        "model": request.model,
        "messages": msgs,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if request.json_mode {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }
    body
}

/// Map an HTTP failure to a provider error; 429 and 5xx are transient.
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> DeskError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(5000);
        return DeskError::RateLimited {
            provider: provider.into(),
            retry_after_ms,
        };
    }
    DeskError::Provider {
        provider: provider.into(),
        message: format!("HTTP {}: {}", status, body),
        retriable: status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT,
    }
}

pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> DeskError {
    DeskError::Provider {
        provider: provider.into(),
        message: e.to_string(),
        retriable: e.is_timeout() || e.is_connect(),
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeskError> {
        let body = build_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(
                "openai",
                status,
                retry_after.as_deref(),
                &error_body,
            ));
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| DeskError::Provider {
            provider: "openai".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        let choice = &resp["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        let stop_reason = match choice["finish_reason"].as_str() {
            Some("stop") => StopReason::EndTurn,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        };

        Ok(ChatResponse {
            content,
            usage,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;

    #[test]
    fn test_body_json_mode() {
        let req = ChatRequest {
            model: "gpt-4-turbo-preview".into(),
            system: Some("You are an evaluator.".into()),
            messages: vec![Message::user("Score this.")],
            max_tokens: Some(4000),
            temperature: Some(0.1),
            json_mode: true,
        };
        let body = build_body(&req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Score this.");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 4000);
    }

    #[test]
    fn test_status_error_classification() {
        let e = status_error("openai", reqwest::StatusCode::TOO_MANY_REQUESTS, Some("7"), "");
        assert!(matches!(e, DeskError::RateLimited { retry_after_ms: 7000, .. }));

        let e = status_error("openai", reqwest::StatusCode::BAD_GATEWAY, None, "down");
        assert!(e.is_retriable());

        let e = status_error("openai", reqwest::StatusCode::BAD_REQUEST, None, "bad");
        assert!(!e.is_retriable());
        assert!(e.to_string().contains("HTTP 400"));
    }
}
