use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::pipeline::error::JobError;
use crate::pipeline::request::GenerationRequest;

pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub trait GenerationClient: Send + Sync + 'static {
    fn generate(&self, request: &GenerationRequest) -> Result<Value, JobError>;
}

pub type SharedGenerationClient = Arc<dyn GenerationClient>;

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: String,
    pub model_id: String,
    pub api_base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: String::from(DEFAULT_MODEL_ID),
            api_base_url: String::from(DEFAULT_API_BASE_URL),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn endpoint(&self) -> Result<Url, JobError> {
        let base = self.api_base_url.trim_end_matches('/');
        let raw = format!("{base}/{}:streamGenerateContent", self.model_id.trim());
        Url::parse_with_params(raw.as_str(), &[("key", self.api_key.as_str())])
            .map_err(|e| JobError::Transport(format!("invalid endpoint '{raw}': {e}")))
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("model_id", &self.model_id)
            .field("api_base_url", &self.api_base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    config: ClientConfig,
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> Result<Self, JobError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JobError::Transport(format!("http client init failed: {e}")))?;
        Ok(Self { http, config })
    }
}

impl GenerationClient for GeminiClient {
    fn generate(&self, request: &GenerationRequest) -> Result<Value, JobError> {
        let endpoint = self.config.endpoint()?;
        debug!(model = %self.config.model_id, parts = request.parts().len(), "sending generation request");
        let resp = self
            .http
            .post(endpoint)
            .json(request)
            .send()
            .map_err(|e| JobError::Transport(format!("generation request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(JobError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .map_err(|e| JobError::NoImageData(format!("response is not JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn endpoint_targets_model_stream_method_with_key_param() {
        let mut config = ClientConfig::new("secret key");
        config.model_id = String::from("gemini-test");
        config.api_base_url = String::from("https://example.test/v1beta/models/");

        let url = config.endpoint().expect("endpoint should build");
        assert_eq!(
            url.as_str(),
            "https://example.test/v1beta/models/gemini-test:streamGenerateContent?key=secret+key"
        );
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::new("k");
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.timeout, Duration::from_secs(120));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let rendered = format!("{:?}", ClientConfig::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let mut config = ClientConfig::new("k");
        config.api_base_url = String::from("http://127.0.0.1:9/v1beta/models");
        config.timeout = Duration::from_secs(2);
        let client = GeminiClient::new(config).expect("client should build");
        let request = crate::pipeline::request::build_generation_request(
            "hi",
            crate::pipeline::request::ImageSize::default(),
            &[],
        );
        let err = client.generate(&request).expect_err("request should fail");
        assert!(matches!(err, JobError::Transport(_)));
    }

    /// Serves one canned HTTP response on a local port and returns the base URL.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("client should connect");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header line");
                let header = line.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().expect("content length");
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read request body");
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write response");
        });
        (format!("http://{addr}/v1beta/models"), handle)
    }

    fn client_for(base_url: String) -> GeminiClient {
        let mut config = ClientConfig::new("k");
        config.api_base_url = base_url;
        config.timeout = Duration::from_secs(5);
        GeminiClient::new(config).expect("client should build")
    }

    fn sample_request() -> GenerationRequest {
        crate::pipeline::request::build_generation_request(
            "hi",
            crate::pipeline::request::ImageSize::default(),
            &[],
        )
    }

    #[test]
    fn non_success_status_keeps_the_body() {
        let (base_url, server) = serve_once("HTTP/1.1 429 Too Many Requests", r#"{"error":"quota"}"#);
        let err = client_for(base_url)
            .generate(&sample_request())
            .expect_err("429 should fail");
        server.join().expect("server thread");

        match err {
            JobError::Remote { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, r#"{"error":"quota"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn success_with_non_json_body_has_no_image_data() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", "<html>maintenance</html>");
        let err = client_for(base_url)
            .generate(&sample_request())
            .expect_err("html body should fail");
        server.join().expect("server thread");
        assert_eq!(err.kind(), crate::pipeline::error::JobErrorKind::NoImageData);
    }

    #[test]
    fn success_returns_the_parsed_body() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", r#"[{"candidates":[]}]"#);
        let value = client_for(base_url)
            .generate(&sample_request())
            .expect("200 should succeed");
        server.join().expect("server thread");
        assert_eq!(value[0]["candidates"], Value::Array(Vec::new()));
    }
}
