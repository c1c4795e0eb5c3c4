use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thoughtmates_core::{CoreError, EmbeddingConfig, EmbeddingError, Vector};
use tracing::debug;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vector, CoreError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Azure OpenAI style `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct AzureOpenAiProvider {
    client: Client,
    url: String,
    api_key: Option<String>,
    dimensions: Option<usize>,
}

impl AzureOpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("thoughtmates/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vector, CoreError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput.into());
        }

        let mut request = self.client.post(&self.url).json(&EmbeddingRequest {
            input: text,
            dimensions: self.dimensions,
        });
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(request_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(EmbeddingError::RateLimited { retry_after }.into());
        }
        if status.is_server_error() {
            return Err(EmbeddingError::ServiceUnavailable {
                status_code: status.as_u16(),
            }
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RequestFailed {
                reason: format!("status {}: {}", status.as_u16(), body),
            }
            .into());
        }

        let json: Value = response.json().await.map_err(|e| EmbeddingError::InvalidResponse {
            details: e.to_string(),
        })?;

        let mut vectors = parse_embedding_response(&json)?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::InvalidResponse {
                details: format!("expected one embedding, got {}", vectors.len()),
            }
            .into());
        }
        let vector = vectors.remove(0);

        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                }
                .into());
            }
        }

        debug!("Embedded {} chars into {} dimensions", text.len(), vector.len());
        Ok(vector)
    }
}

/// Transport failures (refused, reset, timed out) are provider failures too.
fn request_error(error: reqwest::Error) -> CoreError {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    EmbeddingError::RequestFailed {
        reason: format!("{kind}: {error}"),
    }
    .into()
}

/// Reads `data[].embedding`, ordered by `index`.
pub(crate) fn parse_embedding_response(json: &Value) -> Result<Vec<Vector>, EmbeddingError> {
    let invalid = |details: &str| EmbeddingError::InvalidResponse {
        details: details.to_string(),
    };

    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed: Vec<(usize, Vector)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("item missing embedding array"))?;

        let vector = embedding
            .iter()
            .map(|v| v.as_f64().map(|n| n as f32))
            .collect::<Option<Vector>>()
            .ok_or_else(|| invalid("embedding value must be numeric"))?;
        if vector.is_empty() {
            return Err(invalid("empty embedding"));
        }
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
