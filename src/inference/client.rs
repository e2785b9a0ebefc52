//! Ollama generate client.
//!
//! Posts a single prompt to `/api/generate` with streaming enabled and hands
//! the body to the NDJSON decoder. One request, one sequential read loop; no
//! retries or fallbacks.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;

use super::config::GenerateConfig;
use super::errors::InferenceError;
use super::streaming::decode_generate_stream;
use super::types::{GenerateOutcome, GenerateRequest};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the lightweight availability probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

// ─── OllamaClient ────────────────────────────────────────────────────────────

/// Client for one Ollama host.
pub struct OllamaClient {
    http: HttpClient,
    /// Base address without a trailing slash, e.g. `http://localhost:11434`.
    host: String,
    /// Total request timeout, if configured.
    request_timeout: Option<Duration>,
}

impl OllamaClient {
    /// Create a client for `host`. No connectivity check happens here.
    pub fn new(host: &str, request_timeout: Option<Duration>) -> Result<Self, InferenceError> {
        let host = host.trim().trim_end_matches('/').to_string();
        if host.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "no host set".into(),
            });
        }

        let mut builder = HttpClient::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| InferenceError::ConnectionFailed {
            endpoint: host.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            http,
            host,
            request_timeout,
        })
    }

    /// Create a client from the node configuration.
    pub fn from_config(config: &GenerateConfig) -> Result<Self, InferenceError> {
        Self::new(
            &config.host,
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }

    /// The base address requests go to.
    pub fn host(&self) -> &str {
        &self.host
    }

    // ─── Generate (streaming) ────────────────────────────────────────────

    /// Send a generate request and decode the streamed reply.
    ///
    /// `on_partial` receives the accumulated reply text after every received
    /// body chunk.
    pub async fn generate<F>(
        &self,
        request: &GenerateRequest,
        on_partial: F,
    ) -> Result<GenerateOutcome, InferenceError>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/api/generate", self.host);

        // Metadata only; prompts can be large and private.
        tracing::info!(
            url = %url,
            model = %request.model,
            prompt_len = request.prompt.len(),
            raw = request.raw,
            json_format = request.format.is_some(),
            option_count = request.options.len(),
            "=== GENERATE REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = service_error_message(&body_text)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            tracing::warn!(status = status.as_u16(), message = %message, "generate request rejected");
            return Err(InferenceError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let outcome = decode_generate_stream(response.bytes_stream(), on_partial).await?;

        tracing::info!(
            model = %request.model,
            reply_len = outcome.text.len(),
            eval_count = outcome.stats.eval_count,
            tokens_per_second = outcome.stats.tokens_per_second(),
            "generate request complete"
        );

        Ok(outcome)
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check whether the host answers `GET /api/tags` with a 2xx.
    ///
    /// Connection problems report `Ok(false)` rather than an error.
    pub async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/api/tags", self.host);

        match self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "ollama health check failed");
                Ok(false)
            }
        }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            let duration_secs = self
                .request_timeout
                .unwrap_or(CONNECT_TIMEOUT)
                .as_secs();
            InferenceError::Timeout { duration_secs }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Pull the service's own message out of an error body.
///
/// Ollama answers with `{"error": "..."}`; `message` is accepted too.
fn service_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .message
        .or(parsed.error)
        .filter(|m| !m.trim().is_empty())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::Map;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A captured HTTP request: request line and JSON body.
    pub(crate) struct Captured {
        pub request_line: String,
        pub body: serde_json::Value,
    }

    /// Serve exactly one HTTP request with a canned response.
    ///
    /// The response is written with `Connection: close` and no length so the
    /// client reads the body until EOF. `body_parts` are written one at a
    /// time with a flush in between.
    pub(crate) async fn serve_once(
        status_line: &'static str,
        body_parts: Vec<String>,
    ) -> (String, tokio::task::JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed mid-body");
                raw.extend_from_slice(&buf[..n]);
            }

            let body_bytes = &raw[header_end..header_end + content_length];
            let body = serde_json::from_slice(body_bytes).unwrap_or(serde_json::Value::Null);
            let request_line = head.lines().next().unwrap_or_default().to_string();

            let header = format!(
                "{status_line}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            for part in body_parts {
                socket.write_all(part.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.shutdown().await.unwrap();

            Captured { request_line, body }
        });

        (format!("http://{addr}"), handle)
    }

    pub(crate) fn ndjson(fragments: &[&str]) -> Vec<String> {
        let mut lines: Vec<String> = fragments
            .iter()
            .map(|f| format!("{}\n", serde_json::json!({"model": "llama2", "response": f, "done": false})))
            .collect();
        lines.push(
            "{\"model\":\"llama2\",\"response\":\"\",\"done\":true,\"total_duration\":900,\"load_duration\":10,\"prompt_eval_count\":4,\"prompt_eval_duration\":20,\"eval_count\":3,\"eval_duration\":1500000000}\n"
                .to_string(),
        );
        lines
    }

    fn request() -> GenerateRequest {
        let mut options = Map::new();
        options.insert("num_predict".into(), 1024.into());
        GenerateRequest {
            model: "llama2".into(),
            prompt: "Hi".into(),
            raw: false,
            stream: true,
            options,
            format: None,
        }
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", None).unwrap();
        assert_eq!(client.host(), "http://localhost:11434");
    }

    #[test]
    fn test_new_rejects_blank_host() {
        let err = OllamaClient::new("   ", None).err().unwrap();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }

    #[test]
    fn test_service_error_message() {
        assert_eq!(
            service_error_message(r#"{"error":"model 'x' not found"}"#).as_deref(),
            Some("model 'x' not found")
        );
        assert_eq!(
            service_error_message(r#"{"message":"bad request"}"#).as_deref(),
            Some("bad request")
        );
        assert!(service_error_message("<html>502</html>").is_none());
        assert!(service_error_message(r#"{"error":""}"#).is_none());
    }

    #[tokio::test]
    async fn test_generate_streams_reply() {
        let (host, server) = serve_once("HTTP/1.1 200 OK", ndjson(&[" Hello", ",", " world"])).await;
        let client = OllamaClient::new(&host, None).unwrap();

        let mut partials = Vec::new();
        let outcome = client
            .generate(&request(), |text| partials.push(text.to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello, world");
        assert_eq!(outcome.stats.eval_count, 3);
        assert_eq!(outcome.stats.tokens_per_second(), 2.0);
        assert_eq!(partials.last().map(String::as_str), Some("Hello, world"));

        let captured = server.await.unwrap();
        assert_eq!(captured.request_line, "POST /api/generate HTTP/1.1");
        assert_eq!(captured.body["model"], "llama2");
        assert_eq!(captured.body["prompt"], "Hi");
        assert_eq!(captured.body["raw"], false);
        assert_eq!(captured.body["stream"], true);
        assert_eq!(captured.body["options"]["num_predict"], 1024);
        assert!(captured.body.get("format").is_none());
    }

    #[tokio::test]
    async fn test_generate_service_error_uses_reported_message() {
        let (host, server) = serve_once(
            "HTTP/1.1 404 Not Found",
            vec![r#"{"error":"model 'nope' not found, try pulling it first"}"#.to_string()],
        )
        .await;
        let client = OllamaClient::new(&host, None).unwrap();

        let err = client.generate(&request(), |_| {}).await.unwrap_err();
        match err {
            InferenceError::ServiceError { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'nope' not found, try pulling it first");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_service_error_falls_back_to_status_text() {
        let (host, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error",
            vec!["oops".to_string()],
        )
        .await;
        let client = OllamaClient::new(&host, None).unwrap();

        let err = client.generate(&request(), |_| {}).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("Internal Server Error"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OllamaClient::new(&format!("http://{addr}"), None).unwrap();
        let err = client.generate(&request(), |_| {}).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_health_check_unreachable_is_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OllamaClient::new(&format!("http://{addr}"), None).unwrap();
        assert!(!client.health_check().await.unwrap());
    }
}
