//! `reqwest` implementation of [`EnrichmentApi`].

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::sse::SseDecoder;
use super::*;
use crate::config::ClientConfig;
use crate::error::{ConfigError, EnrichmentError, Result};

/// Maximum length of a raw error body kept in an error message.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub struct HttpEnrichmentApi {
    client: Client,
    /// Same as `client` minus the overall timeout; the progress stream is long-lived.
    stream_client: Client,
    root: Url,
    token: Option<SecretString>,
}

impl HttpEnrichmentApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let root = Url::parse(&config.api_root()).map_err(|e| ConfigError::Validation {
            message: format!("Invalid baseUrl '{}': {}", config.base_url, e),
        })?;
        if root.cannot_be_a_base() {
            return Err(ConfigError::Validation {
                message: format!("baseUrl '{}' cannot carry a path", config.base_url),
            }
            .into());
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EnrichmentError::network(format!("Failed to create HTTP client: {}", e)))?;
        let stream_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| EnrichmentError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            root,
            token: config.resolve_token()?,
        })
    }

    /// Root URL every endpoint hangs off.
    pub fn root(&self) -> &Url {
        &self.root
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        // Checked in `new`: the root can be a base.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, fallback: &str) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| EnrichmentError::network(format!("{}: {}", fallback, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body, fallback))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        fallback: &str,
    ) -> Result<T> {
        let response = self.send(request, fallback).await?;
        let status = response.status();
        response.json::<T>().await.map_err(|e| EnrichmentError::Network {
            message: format!("{}: unreadable response body: {}", fallback, e),
            status: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl EnrichmentApi for HttpEnrichmentApi {
    async fn list_processors(&self) -> Result<Vec<ProcessorInfo>> {
        let url = self.endpoint(&["processors"]);
        self.send_json(self.client.get(url), FALLBACK_LIST_PROCESSORS)
            .await
    }

    async fn create_job(&self, request: &CreateJobRequest) -> Result<EnrichmentJob> {
        let url = self.endpoint(&["jobs"]);
        self.send_json(self.client.post(url).json(request), FALLBACK_CREATE_JOB)
            .await
    }

    async fn get_job(&self, job_id: &str) -> Result<EnrichmentJob> {
        let url = self.endpoint(&["jobs", job_id]);
        self.send_json(self.client.get(url), FALLBACK_GET_JOB).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let url = self.endpoint(&["jobs", job_id]);
        self.send(self.client.delete(url), FALLBACK_CANCEL_JOB)
            .await
            .map(|_| ())
    }

    async fn list_export_jobs(&self, export_id: &str) -> Result<Vec<EnrichmentJob>> {
        let url = self.endpoint(&["exports", export_id, "jobs"]);
        self.send_json(self.client.get(url), FALLBACK_LIST_JOBS)
            .await
    }

    async fn open_progress_stream(&self, job_id: &str) -> Result<ProgressStream> {
        let url = self.endpoint(&["jobs", job_id, "stream"]);
        let request = self
            .stream_client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache");
        let response = self.send(request, FALLBACK_OPEN_STREAM).await?;
        Ok(decode_event_stream(response))
    }
}

/// Turns a streaming response body into its SSE data payloads.
fn decode_event_stream(response: Response) -> ProgressStream {
    let bytes = response.bytes_stream().boxed();
    let state = (bytes, SseDecoder::new(), VecDeque::<String>::new());

    futures_util::stream::unfold(state, |(mut bytes, mut decoder, mut ready)| async move {
        loop {
            if let Some(data) = ready.pop_front() {
                return Some((Ok(data), (bytes, decoder, ready)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.feed(&chunk)),
                Some(Err(e)) => {
                    let err = EnrichmentError::StreamTransport(e.to_string());
                    return Some((Err(err), (bytes, decoder, ready)));
                }
                None => {
                    if decoder.has_pending() {
                        log::debug!("Progress stream ended mid-event; discarding partial event");
                    }
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// Maps a non-2xx response onto the error taxonomy.
pub(crate) fn error_from_response(status: StatusCode, body: &str, fallback: &str) -> EnrichmentError {
    let detail = parse_detail(body);

    if status == StatusCode::NOT_FOUND {
        return EnrichmentError::NotFound(detail.unwrap_or_else(|| format!("{} (not found)", fallback)));
    }

    match detail {
        Some(detail) => EnrichmentError::BackendRejected(detail),
        None => {
            let body = body.trim();
            let message = if body.is_empty() {
                format!("{} ({})", fallback, status)
            } else {
                format!("{} ({}): {}", fallback, status, truncate(body))
            };
            EnrichmentError::Network {
                message,
                status: Some(status.as_u16()),
            }
        }
    }
}

/// Extracts `detail` from an error body. FastAPI sends a string for
/// explicit rejections and a list of `{loc, msg, type}` for validation errors.
pub(crate) fn parse_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => item.to_string(),
                })
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
