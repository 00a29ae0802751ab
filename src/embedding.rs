//! Embedding provider abstraction and HTTP client.
//!
//! Defines the [`EmbeddingProvider`] trait the pipeline consumes and the
//! [`HttpEmbeddingClient`] adapter for OpenAI-compatible `/embeddings`
//! endpoints. The client batches requests, re-orders responses by their
//! input index, and retries transient failures (429, 5xx, transport
//! errors) with exponential backoff; other HTTP errors surface the
//! response body.
//!
//! Inputs are whitespace-cleaned and truncated to [`MAX_EMBED_CHARS`]
//! before they leave the process. Configuration can be hot-swapped via
//! [`HttpEmbeddingClient::update_config`] without rebuilding the engine.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Longest input the client will send, in characters.
pub const MAX_EMBED_CHARS: usize = 8_000;

const TRUNCATION_MARKER: &str = "…";

/// Outcome of a connectivity probe against the embedding endpoint.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub ok: bool,
    pub dimension: Option<usize>,
    pub error: Option<String>,
}

/// Something that can turn text into fixed-length vectors.
///
/// The indexer and query engine only ever see this trait; tests inject
/// deterministic stubs.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch; the result matches the input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed the literal string `"test"` and report the observed
    /// dimension, or the failure.
    async fn probe(&self) -> ProbeResult {
        match self.embed_one("test").await {
            Ok(v) => ProbeResult {
                ok: true,
                dimension: Some(v.len()),
                error: None,
            },
            Err(e) => ProbeResult {
                ok: false,
                dimension: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// HTTP adapter for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    config: RwLock<EmbeddingConfig>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: RwLock::new(config),
        }
    }

    /// Hot-swap endpoint and model; other knobs keep their values. The
    /// next request uses the new configuration.
    pub fn update_config(&self, endpoint: String, model: String) {
        let mut cfg = self.config.write().unwrap();
        cfg.endpoint = endpoint;
        cfg.model = model;
    }

    fn config_snapshot(&self) -> EmbeddingConfig {
        self.config.read().unwrap().clone()
    }

    /// Query `<endpoint>/../models` for the ids the server offers.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let cfg = self.config_snapshot();
        let url = models_url(&cfg.endpoint);
        let mut req = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(cfg.timeout_secs));
        if let Some(key) = &cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingTransient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::EmbeddingTransient(format!("{}: {}", status, body)));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingProtocol(e.to_string()))?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| EngineError::EmbeddingProtocol("missing data array".into()))?;
        Ok(data
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    /// One POST with retry/backoff. `expected` is the number of input
    /// items; the response is re-ordered by its `index` tags.
    async fn request(
        &self,
        cfg: &EmbeddingConfig,
        input: Value,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "input": input,
            "model": cfg.model,
        });

        let mut last_err = None;
        for attempt in 0..=cfg.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500u64 * (1u64 << (attempt - 1).min(4)));
                debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.http.post(&cfg.endpoint).timeout(timeout).json(&body);
            if let Some(key) = &cfg.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let json: Value = resp
                            .json()
                            .await
                            .map_err(|e| EngineError::EmbeddingProtocol(e.to_string()))?;
                        return parse_embedding_response(&json, expected);
                    }
                    let body_text = resp.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, "embedding endpoint error, will retry");
                        last_err = Some(EngineError::EmbeddingTransient(format!(
                            "{}: {}",
                            status, body_text
                        )));
                        continue;
                    }
                    return Err(EngineError::EmbeddingProtocol(format!(
                        "{}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::EmbeddingTransient(e.to_string()));
                    continue;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| EngineError::EmbeddingTransient("request failed".into())))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let cfg = self.config_snapshot();
        let cleaned = prepare_input(text);
        let mut vectors = self
            .request(
                &cfg,
                Value::String(cleaned),
                1,
                Duration::from_secs(cfg.timeout_secs),
            )
            .await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::EmbeddingProtocol("empty embedding response".into()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let cfg = self.config_snapshot();
        let timeout = Duration::from_secs(cfg.long_timeout_secs);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(cfg.batch_size.max(1)) {
            let cleaned: Vec<Value> = batch
                .iter()
                .map(|t| Value::String(prepare_input(t)))
                .collect();
            let vectors = self
                .request(&cfg, Value::Array(cleaned), batch.len(), timeout)
                .await?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Collapse whitespace runs and truncate to [`MAX_EMBED_CHARS`].
fn prepare_input(text: &str) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= MAX_EMBED_CHARS {
        return cleaned;
    }
    let mut truncated: String = cleaned.chars().take(MAX_EMBED_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Pull `data[].embedding` out of an OpenAI-shaped response, re-ordered
/// by each item's `index` so the result matches the input order.
fn parse_embedding_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::EmbeddingProtocol("missing data array".into()))?;
    if data.len() != expected {
        return Err(EngineError::EmbeddingProtocol(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        if index >= expected {
            return Err(EngineError::EmbeddingProtocol(format!(
                "embedding index {} out of range",
                index
            )));
        }
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::EmbeddingProtocol("missing embedding".into()))?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if slots[index].replace(vector).is_some() {
            return Err(EngineError::EmbeddingProtocol(format!(
                "duplicate embedding index {}",
                index
            )));
        }
    }
    slots
        .into_iter()
        .map(|s| s.ok_or_else(|| EngineError::EmbeddingProtocol("missing embedding index".into())))
        .collect()
}

/// Derive the sibling `models` URL from the embeddings endpoint.
fn models_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, _)) => format!("{}/models", base),
        None => format!("{}/models", trimmed),
    }
}
