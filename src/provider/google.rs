use super::{to_contents, ChatRepository, Content, StreamFuture, TextStream};
use crate::error::ProviderError;
use crate::message::{Author, Message};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/";

#[derive(Debug, Clone)]
pub struct GeminiRepository {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
    model: String,
}

impl GeminiRepository {
    pub fn new(
        http: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            api_key: api_key.into(),
            api_base: Url::parse(DEFAULT_API_BASE)?,
            model: model.into(),
        })
    }

    /// Point requests at a different endpoint (proxies, regional gateways).
    pub fn with_api_base(mut self, base: &str) -> anyhow::Result<Self> {
        self.api_base = Url::parse(base)?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_url(&self) -> Result<Url, ProviderError> {
        // v1beta:streamGenerateContent supports Server-Sent Events with alt=sse.
        // Docs: https://ai.google.dev/api/rest/v1beta/models/streamGenerateContent
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{}:streamGenerateContent", self.model))
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("alt", "sse");
        Ok(url)
    }

    fn headers() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        h
    }
}

fn build_request(text: &str, history: &[Message]) -> StreamGenerateContentRequest {
    let mut contents = to_contents(history);
    contents.push(Content::new(Author::User, text));
    StreamGenerateContentRequest { contents }
}

impl ChatRepository for GeminiRepository {
    fn name(&self) -> &'static str {
        "google"
    }

    fn send_message_stream(&self, text: &str, history: &[Message]) -> StreamFuture {
        let this = self.clone();
        let body = build_request(text, history);

        Box::pin(async move {
            let url = this.build_url()?;
            tracing::debug!(model = %this.model, turns = body.contents.len(), "starting Gemini stream");

            let resp = this
                .http
                .post(url)
                .headers(Self::headers())
                .json(&body)
                .send()
                .await
                .map_err(|e| ProviderError::Request(e.without_url().to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }

            let (tx, rx) = mpsc::channel::<Result<String, ProviderError>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();

                while let Some(item) = stream.next().await {
                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::Stream(e.without_url().to_string())))
                                .await;
                            return;
                        }
                    };

                    for ev in parser.push(&bytes) {
                        let data = match ev {
                            Ok(SseEvent::Data(data)) => data,
                            Ok(SseEvent::Other) => continue,
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };

                        match decode_event(&data) {
                            Ok(Some(text)) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    // Consumer went away.
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                }
                tracing::debug!("Gemini stream finished");
            });

            Ok::<_, ProviderError>(Box::pin(ReceiverStream::new(rx)) as TextStream)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct StreamGenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamGenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Turn one SSE data payload into a text fragment, if it carries any.
fn decode_event(data: &str) -> Result<Option<String>, ProviderError> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let r: StreamGenerateContentResponse =
        serde_json::from_str(data).map_err(|e| ProviderError::Decode(e.to_string()))?;
    if let Some(err) = r.error {
        return Err(ProviderError::Api {
            code: err.code,
            message: err.message,
        });
    }
    Ok(extract_text(&r))
}

fn extract_text(r: &StreamGenerateContentResponse) -> Option<String> {
    // First candidate only; all of its text parts.
    let text = r.candidates.first()?.content.as_ref()?.text();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Prefer the provider's own error message over the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => env.error.message,
        _ => body.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Other,
}

/// Minimal SSE parser.
///
/// - Collects UTF-8 lines
/// - Emits Data events when a blank line ends an event
struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, ProviderError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if !self.cur_data.is_empty() {
                    if self.cur_data.ends_with('\n') {
                        self.cur_data.pop();
                    }
                    out.push(Ok(SseEvent::Data(std::mem::take(&mut self.cur_data))));
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(ProviderError::Decode(format!(
                        "SSE line is not valid UTF-8: {e}"
                    ))));
                    continue;
                }
            };

            if let Some(rest) = s.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            } else {
                // event:, id:, retry: and comments
                out.push(Ok(SseEvent::Other));
            }
        }

        out
    }
}
