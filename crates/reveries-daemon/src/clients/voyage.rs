//! Voyage AI's embeddings endpoint — a single non-streaming POST per call.

use async_trait::async_trait;
use reveries_core::{EmbeddingModel, ModelError};
use serde_json::json;

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com";

pub struct VoyageClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl VoyageClient {
    pub fn new(api_key: String, model: String) -> Self {
        VoyageClient {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: std::env::var("VOYAGE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingModel for VoyageClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let endpoint = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "input": [text],
            "model": self.model,
        });

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ModelError::Network(e.to_string())
                } else {
                    ModelError::Protocol(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Protocol(format!("voyage returned {status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::Protocol(e.to_string()))?;

        body.get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .ok_or_else(|| ModelError::Protocol("missing data[0].embedding".to_string()))
    }
}
