use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::validation;

const LOG_PREVIEW_CHARS: usize = 300;

const FACE_SWAP_PROMPT: &str = concat!(
    "You are an expert photo editor working with two images.\n",
    "BASE: keep everything from this image: background, pose, body, clothing, hair, lighting.\n",
    "SELFIE: take ONLY the facial identity from this image.\n\n",
    "Replace the face of the person in BASE with the face identity from SELFIE.\n",
    "- Preserve the BASE composition and camera angle.\n",
    "- Match the BASE lighting and shadows.\n",
    "- Keep the result photorealistic.\n",
    "- Return exactly one edited image.\n",
    "- If either image has no clearly visible face, reply with the text NO_FACE and no image.\n",
);

/// A remote capability that swaps the face from one image into another.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    /// Put the face from `face_image` onto the person in `source_image`.
    async fn edit(
        &self,
        source_image: &[u8],
        face_image: &[u8],
        model_id: &str,
    ) -> Result<Vec<u8>, EditError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// OpenRouter chat-completions client driving an image-output model.
pub struct OpenRouterClient {
    http: Client,
    endpoint: String,
    api_key: String,
    referer: String,
    max_retries: u32,
    retry_backoff: Duration,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<serde_json::Value>,
    #[serde(default)]
    images: Vec<ImagePart>,
}

#[derive(Deserialize)]
struct ImagePart {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

impl OpenRouterClient {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.edit_timeout()).build()?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                config.openrouter_base_url.trim_end_matches('/')
            ),
            api_key: config.openrouter_api_key.clone(),
            referer: config.base_url.clone(),
            max_retries: config.edit_max_retries,
            retry_backoff: config.retry_backoff(),
        })
    }

    fn build_payload(&self, source_url: &str, face_url: &str, model_id: &str) -> serde_json::Value {
        serde_json::json!({
            "model": model_id,
            "modalities": ["image", "text"],
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": FACE_SWAP_PROMPT },
                    { "type": "text", "text": "BASE IMAGE:" },
                    { "type": "image_url", "image_url": { "url": source_url } },
                    { "type": "text", "text": "SELFIE IMAGE:" },
                    { "type": "image_url", "image_url": { "url": face_url } }
                ]
            }],
            "stream": false
        })
    }

    async fn send_once(&self, payload: &serde_json::Value) -> Result<Vec<u8>, EditError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .json(payload)
            .send()
            .await
            .map_err(|e| EditError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EditError::RemoteUnavailable(e.to_string()))?;

        tracing::debug!(status = %status, body = %preview(&body), "OpenRouter response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EditError::RemoteQuotaExceeded(preview(&body)));
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(EditError::RemoteUnavailable(format!(
                "HTTP {}: {}",
                status,
                preview(&body)
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|_| {
            EditError::RemoteRejected(format!("HTTP {}: non-JSON body: {}", status, preview(&body)))
        })?;

        if let Some(err) = parsed.error {
            let message = err.message.unwrap_or_else(|| "unspecified error".to_string());
            let is_quota = err
                .code
                .as_ref()
                .is_some_and(|c| c.as_i64() == Some(429) || c.as_str() == Some("429"));
            return Err(if is_quota {
                EditError::RemoteQuotaExceeded(message)
            } else {
                EditError::RemoteRejected(message)
            });
        }

        if !status.is_success() {
            return Err(EditError::RemoteRejected(format!(
                "HTTP {}: {}",
                status,
                preview(&body)
            )));
        }

        extract_image(parsed)
    }
}

#[async_trait]
impl ImageEditor for OpenRouterClient {
    async fn edit(
        &self,
        source_image: &[u8],
        face_image: &[u8],
        model_id: &str,
    ) -> Result<Vec<u8>, EditError> {
        let source_format = validation::detect_format(source_image)
            .map_err(|e| EditError::InvalidInput(format!("source image: {e}")))?;
        let face_format = validation::detect_format(face_image)
            .map_err(|e| EditError::InvalidInput(format!("face image: {e}")))?;

        let payload = self.build_payload(
            &validation::to_data_url(source_image, source_format),
            &validation::to_data_url(face_image, face_format),
            model_id,
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&payload).await {
                Err(EditError::RemoteUnavailable(reason)) if attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "OpenRouter unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

fn extract_image(response: ChatResponse) -> Result<Vec<u8>, EditError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| EditError::RemoteRejected("response contained no choices".to_string()))?;

    let Some(image) = message.images.into_iter().next() else {
        let text = match message.content {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if text.contains("NO_FACE") {
            return Err(EditError::RemoteRejected(
                "model reported no clear face in one of the images".to_string(),
            ));
        }
        return Err(EditError::RemoteRejected(format!(
            "no image returned (model reply: {})",
            preview(&text)
        )));
    };

    let (bytes, mime) = validation::decode_data_url(&image.image_url.url)
        .map_err(|e| EditError::RemoteRejected(e.to_string()))?;
    validation::validate_image(&bytes)
        .map_err(|e| EditError::RemoteRejected(format!("returned image unusable: {e}")))?;

    tracing::debug!(bytes = bytes.len(), mime = %mime, "Decoded edited image");
    Ok(bytes)
}

fn preview(s: &str) -> String {
    if s.chars().count() <= LOG_PREVIEW_CHARS {
        s.to_string()
    } else {
        let head: String = s.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{head}...(truncated)")
    }
}

/// Failure of a remote edit; the display form is recorded on failed jobs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EditError {
    #[error("invalid_input: {0}")]
    InvalidInput(String),

    #[error("remote_unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote_rejected: {0}")]
    RemoteRejected(String),

    #[error("remote_quota_exceeded: {0}")]
    RemoteQuotaExceeded(String),
}

impl EditError {
    pub fn kind(&self) -> &'static str {
        match self {
            EditError::InvalidInput(_) => "invalid_input",
            EditError::RemoteUnavailable(_) => "remote_unavailable",
            EditError::RemoteRejected(_) => "remote_rejected",
            EditError::RemoteQuotaExceeded(_) => "remote_quota_exceeded",
        }
    }
}
