//! Voyage-style embedding backend
//!
//! POSTs to an `/embeddings` endpoint with `input_type` (document/query)
//! and a fixed output dimension, returning vectors in input order.

use serde_json::json;

use super::{EmbedBackend, GatewayError, InputType, EMBEDDING_DIMENSIONS};

/// Default embeddings endpoint
const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

/// HTTP client for the embedding service
pub struct VoyageEmbed {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl VoyageEmbed {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension: EMBEDDING_DIMENSIONS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

#[async_trait::async_trait]
impl EmbedBackend for VoyageEmbed {
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if self.api_key.trim().is_empty() {
            return Err(GatewayError::MissingKey("embed api key not configured".into()));
        }

        let endpoint = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "input": texts,
            "input_type": input_type.as_str(),
            "output_dimension": self.dimension,
        });

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .get("detail")
                .or_else(|| body.get("error"))
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(match status.as_u16() {
                429 => GatewayError::RateLimited(message),
                500..=599 => GatewayError::Overloaded(message),
                other => GatewayError::Api { status: other, message },
            });
        }

        parse_embeddings(&body, texts.len())
    }
}

/// Parse the `data` array, ordered by the `index` field
fn parse_embeddings(
    body: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, GatewayError> {
    let data = body
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GatewayError::Decode("missing data array".into()))?;

    let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector: Vec<f32> = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| GatewayError::Decode("missing embedding field".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        if index < expected {
            ordered[index] = Some(vector);
        }
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| GatewayError::Decode(format!("no embedding for input {i}"))))
        .collect()
}
