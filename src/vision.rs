//! Vision-model adapter for transcribing images.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint with image
//! content parts. Whether the configured model can see images at all is
//! established once by [`probe`](VisionTextExtractor::supports_vision)
//! — a fixed tiny prompt plus a 1×1 image — and cached until the
//! configuration changes. Replies matching a known refusal phrase mark
//! the model as text-only.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::VisionConfig;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;

/// Phrases that mark a probe reply as "this model cannot see images".
const NO_VISION_SENTINELS: &[&str] = &[
    "cannot see",
    "does not support vision",
    "no image",
    "no picture",
];

/// Phrases that mark an extraction reply as "nothing usable in there".
const NOTHING_FOUND_SENTINELS: &[&str] = &["no text", "nothing found", "unable to extract"];

const PROBE_PROMPT: &str = "Briefly describe the attached image.";

const EXTRACT_PROMPT: &str = "Extract and transcribe all text visible in this image. \
If the image contains no text, describe its content in one or two sentences. \
Reply with only the extracted content.";

/// 1×1 transparent PNG used by the capability probe.
const PROBE_IMAGE: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Result of one extraction attempt, mirroring the `(ok, text, reason)`
/// shape the indexer consumes. A failed attempt is not an error of the
/// batch; the source is skipped.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub ok: bool,
    pub text: String,
    pub reason: Option<String>,
}

impl Extraction {
    fn text(text: String) -> Self {
        Self {
            ok: true,
            text,
            reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: String::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Something that can turn an image into text.
#[async_trait]
pub trait VisionTextExtractor: Send + Sync {
    /// Whether the configured model accepts image input. Implementations
    /// cache the answer until configuration changes.
    async fn supports_vision(&self) -> bool;

    /// Ask the model to transcribe the image.
    async fn extract(&self, image: &[u8], extension: &str) -> Extraction;
}

/// Map a file extension to its MIME type; unknown extensions fall back
/// to `image/png`.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// HTTP adapter for a vision-capable chat model.
pub struct HttpVisionClient {
    http: reqwest::Client,
    config: std::sync::RwLock<VisionConfig>,
    capability: tokio::sync::Mutex<Option<bool>>,
}

impl HttpVisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: std::sync::RwLock::new(config),
            capability: tokio::sync::Mutex::new(None),
        }
    }

    /// Hot-swap endpoint and model and drop the cached capability probe.
    pub async fn update_config(&self, endpoint: String, model: String) {
        {
            let mut cfg = self.config.write().unwrap();
            cfg.endpoint = endpoint;
            cfg.model = model;
        }
        *self.capability.lock().await = None;
    }

    fn config_snapshot(&self) -> VisionConfig {
        self.config.read().unwrap().clone()
    }

    /// One chat-completion round trip with an attached image; returns the
    /// assistant's text reply.
    async fn chat(&self, prompt: &str, image: &[u8], extension: &str) -> Result<String, String> {
        let cfg = self.config_snapshot();
        let data_url = format!(
            "data:{};base64,{}",
            mime_for_extension(extension),
            BASE64_STANDARD.encode(image)
        );
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        });

        let mut req = self
            .http
            .post(&cfg.endpoint)
            .timeout(Duration::from_secs(60))
            .json(&body);
        if let Some(key) = &cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("{}: {}", status, body));
        }
        let json: Value = resp.json().await.map_err(|e| e.to_string())?;
        reply_content(&json).ok_or_else(|| "reply has no message content".to_string())
    }
}

fn reply_content(json: &Value) -> Option<String> {
    json.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.trim().to_string())
}

fn matches_any(reply: &str, sentinels: &[&str]) -> bool {
    let lower = reply.to_lowercase();
    sentinels.iter().any(|s| lower.contains(s))
}

#[async_trait]
impl VisionTextExtractor for HttpVisionClient {
    async fn supports_vision(&self) -> bool {
        if !self.config_snapshot().enabled {
            return false;
        }
        let mut cached = self.capability.lock().await;
        if let Some(answer) = *cached {
            return answer;
        }
        match self.chat(PROBE_PROMPT, PROBE_IMAGE, "png").await {
            Ok(reply) => {
                let supported = !matches_any(&reply, NO_VISION_SENTINELS);
                debug!(supported, "vision capability probe finished");
                *cached = Some(supported);
                supported
            }
            Err(e) => {
                // Probe could not run; do not cache, so a later call can
                // try again once the endpoint is reachable.
                warn!(error = %e, "vision capability probe failed");
                false
            }
        }
    }

    async fn extract(&self, image: &[u8], extension: &str) -> Extraction {
        match self.chat(EXTRACT_PROMPT, image, extension).await {
            Ok(reply) if reply.is_empty() => Extraction::failed("model returned an empty reply"),
            Ok(reply) if matches_any(&reply, NOTHING_FOUND_SENTINELS) => {
                Extraction::failed(format!("model found nothing usable: {}", reply))
            }
            Ok(reply) => Extraction::text(reply),
            Err(e) => Extraction::failed(e),
        }
    }
}
