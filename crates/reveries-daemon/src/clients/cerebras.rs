//! Cerebras' OpenAI-compatible chat-completions endpoint, used both for the
//! live conversational/monologue model (streaming) and the consolidation
//! abstraction model (single-shot).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reveries_core::{AbstractionModel, ChatMessage, ChatModel, ChatRole, ModelError};
use serde_json::json;

use super::sse_content_stream;

const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai";

pub struct CerebrasClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl CerebrasClient {
    pub fn new(api_key: String, model: String) -> Self {
        CerebrasClient {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: std::env::var("CEREBRAS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn chat_role_str(role: ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    fn build_messages(&self, system: &str, messages: &[ChatMessage]) -> serde_json::Value {
        let mut out = vec![json!({"role": "system", "content": system})];
        for m in messages {
            out.push(json!({"role": Self::chat_role_str(m.role), "content": m.content}));
        }
        serde_json::Value::Array(out)
    }

    fn classify_send_error(err: reqwest::Error) -> ModelError {
        if err.is_timeout() || err.is_connect() {
            ModelError::Network(err.to_string())
        } else {
            ModelError::Protocol(err.to_string())
        }
    }
}

#[async_trait]
impl ChatModel for CerebrasClient {
    async fn stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String, ModelError>>, ModelError> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": self.build_messages(system, messages),
            "stream": true,
        });

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Protocol(format!("cerebras returned {status}: {body}")));
        }

        Ok(sse_content_stream(response))
    }
}

#[async_trait]
impl AbstractionModel for CerebrasClient {
    async fn abstract_experiences(&self, prompt: &str) -> Result<String, ModelError> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Protocol(format!("cerebras returned {status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Protocol(e.to_string()))?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::Protocol("missing choices[0].message.content".to_string()))
    }
}
