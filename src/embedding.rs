use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[allow(dead_code)]
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    dimensions: Option<usize>,
}

/// HTTP client for the external embedding service (spec.md §4.3, §6). The
/// model itself is out of scope; this type only speaks the wire contract.
pub struct EmbedderClient {
    http: reqwest::Client,
    base_url: String,
    dimensions: usize,
}

impl EmbedderClient {
    pub fn new(cfg: &EmbeddingConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| EngineError::EmbedderProtocol(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            dimensions: cfg.dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// `GET {base_url}/health`; returns `false` on any transport error,
    /// non-ready status, or if the service reports a dimension count that
    /// does not match the configured `dimensions()` (spec.md §4.3).
    pub async fn is_available(&self) -> bool {
        let Ok(resp) = self.http.get(format!("{}/health", self.base_url)).send().await else {
            return false;
        };
        if !resp.status().is_success() {
            return false;
        }
        match resp.json::<HealthResponse>().await {
            Ok(h) => {
                h.status == "ok" && h.dimensions.map_or(true, |d| d == self.dimensions)
            }
            Err(_) => false,
        }
    }

    pub async fn embed_one(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| EngineError::EmbedderProtocol("empty embedding batch response".into()))
    }

    /// `POST {base_url}/embed` with `{"texts": [...]}`, returning one
    /// embedding per input in the same order (spec.md §6).
    pub async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .http
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|e| EngineError::EmbedderUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::EmbedderUnavailable(format!(
                "embedding service returned status {}",
                resp.status()
            )));
        }

        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::EmbedderProtocol(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(EngineError::EmbedderProtocol(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        for emb in &body.embeddings {
            if emb.len() != self.dimensions {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dimensions,
                    got: emb.len(),
                });
            }
        }

        Ok(body.embeddings)
    }
}
