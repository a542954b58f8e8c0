//! Gemini-backed summarizer.
//!
//! Transport failures, rate limiting and server errors surface as
//! [`DiffError::Network`] and are retried with the delay the error suggests.
//! Any other API error ends the request at once.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use archidiff_scale::presets::fit_long_side;

use super::DifferenceSummarizer;
use crate::core::RasterImage;
use crate::error::{DiffError, DiffResult, Retryable, classify};

pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Longest side of each image sent upstream.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const PROMPT: &str = "Compare these two architectural detail drawings. \
Identify the key differences in how the wall is built or layered: wall layers such as gypsum board, \
framing, blocking. Ignore labels, heights and compliance notes unless they change the build. \
If one drawing is simplified, name the physical layer it leaves out. Answer in one or two short paragraphs.";

#[derive(Debug, Clone)]
pub struct GeminiSummarizer {
    client: reqwest::Client,
    key: String,
    model: String,
    max_dimension: u32,
    base_url: String,
    max_retries: u32,
    /// Overrides the delay suggested by the failed attempt.
    retry_delay: Option<Duration>,
}

impl GeminiSummarizer {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            base_url: BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: None,
        }
    }

    /// Read the API key from `api_key_env`.
    pub fn from_env(api_key_env: &str) -> anyhow::Result<Self> {
        let key = std::env::var(api_key_env).map_err(|_| anyhow!("{api_key_env} is not set"))?;
        anyhow::ensure!(!key.trim().is_empty(), "{api_key_env} is empty");
        Ok(Self::new(key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(1);
        self
    }

    /// Point at another endpoint, e.g. a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// One request. Transient failures come back as `Network`.
    async fn generate(&self, url: &str, body: &serde_json::Value) -> DiffResult<String> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.key)
            .json(body)
            .send()
            .await
            .map_err(|e| DiffError::network("generate_content", url).with_source(e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DiffError::network("read_response", url).with_source(e))?;
        if status.is_success() {
            return Ok(text);
        }
        let message = format!("Gemini API error ({}): {}", status, extract_error(&text).unwrap_or(text));
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(DiffError::network("generate_content", url).with_source(message))
        } else {
            Err(DiffError::collaborator("gemini", anyhow!(message)))
        }
    }

    fn inline_png(&self, image: &RasterImage) -> anyhow::Result<serde_json::Value> {
        let target = fit_long_side(image.size(), self.max_dimension);
        let png = image.resized_to(target)?.encode_png()?;
        Ok(json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": BASE64.encode(png)
            }
        }))
    }
}

#[async_trait]
impl DifferenceSummarizer for GeminiSummarizer {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn summarize(&self, reference: &RasterImage, comparison: &RasterImage) -> anyhow::Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": PROMPT},
                    self.inline_png(reference)?,
                    self.inline_png(comparison)?
                ]
            }]
        });
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let mut attempt = 0u32;
        let text = loop {
            match self.generate(&url, &body).await {
                Ok(text) => break text,
                Err(err) if classify::is_transient(&err) && attempt < self.retry_budget(&err) => {
                    attempt += 1;
                    let delay = self
                        .retry_delay
                        .unwrap_or_else(|| Duration::from_millis(err.retry_delay_ms().unwrap_or(0)));
                    warn!(attempt, error = %err, "summary request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        };
        let summary = extract_text(&text)?;
        debug!(chars = summary.len(), "summary received");
        Ok(summary)
    }
}

impl GeminiSummarizer {
    fn retry_budget(&self, err: &DiffError) -> u32 {
        let suggested = err.max_retries().unwrap_or(0) as u32;
        suggested.min(self.max_retries)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn extract_text(body: &str) -> anyhow::Result<String> {
    let payload: GeminiResponse =
        serde_json::from_str(body).map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let content = payload
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;
    let text = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    anyhow::ensure!(!text.trim().is_empty(), "Gemini returned an empty answer");
    Ok(text.trim().to_string())
}

fn extract_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const ANSWER: &str = r#"{"candidates":[{"content":{"parts":[{"text":"Blocking was added."}]}}]}"#;

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Answers one connection per scripted reply, in order.
    async fn scripted(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn blank() -> RasterImage {
        RasterImage::Gray(image::GrayImage::from_pixel(8, 8, image::Luma([255])))
    }

    fn client(base: &str) -> GeminiSummarizer {
        let mut summarizer = GeminiSummarizer::new("k")
            .with_base_url(base)
            .with_retry_delay(Duration::from_millis(5));
        summarizer.client = reqwest::Client::builder().no_proxy().build().unwrap();
        summarizer
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (base, hits) = scripted(vec![(503, "{}"), (429, "{}"), (200, ANSWER)]).await;
        let summary = client(&base).summarize(&blank(), &blank()).await.unwrap();
        assert_eq!(summary, "Blocking was added.");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, hits) = scripted(vec![(400, r#"{"error":{"message":"API key not valid"}}"#), (200, ANSWER)]).await;
        let err = client(&base).summarize(&blank(), &blank()).await.unwrap_err();
        assert!(format!("{err:#}").contains("API key not valid"), "{err:#}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_the_budget() {
        let (base, hits) = scripted(vec![(502, "{}"); 4]).await;
        let err = client(&base)
            .with_max_retries(2)
            .summarize(&blank(), &blank())
            .await
            .unwrap_err();
        let err = err.downcast_ref::<DiffError>().unwrap();
        assert_eq!(err.category(), "network");
        assert!(err.to_string().contains("502"), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn joins_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"The wall "},{"text":"adds a GWB layer."}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "The wall adds a GWB layer.");
    }

    #[test]
    fn empty_candidates_are_errors() {
        assert!(extract_text(r#"{"candidates":[]}"#).is_err());
        assert!(extract_text(r#"{"candidates":[{"content":{"parts":[]}}]}"#).is_err());
        assert!(extract_text("not json").is_err());
    }

    #[test]
    fn api_error_message_is_surfaced() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(extract_error(body).as_deref(), Some("API key not valid"));
        assert_eq!(extract_error("{}"), None);
    }

    #[test]
    fn blank_model_keeps_default() {
        let s = GeminiSummarizer::new("k").with_model("  ");
        assert_eq!(s.model, DEFAULT_MODEL);
    }

    #[test]
    fn images_are_shrunk_before_upload() {
        let s = GeminiSummarizer::new("k").with_max_dimension(16);
        let img = RasterImage::Gray(image::GrayImage::from_pixel(64, 32, image::Luma([255])));
        let part = s.inline_png(&img).unwrap();
        let data = part["inline_data"]["data"].as_str().unwrap();
        let png = BASE64.decode(data).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
