//! reqwest-backed transport for the eventq poll engine.

use std::time::Duration;

use async_trait::async_trait;
use eventq_core::{ApiRequest, Method, Transport, TransportError};
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

/// Default per-request timeout. Longer than the server's long-poll window so
/// an idle poll returns empty instead of timing out.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_ERROR_BODY_BYTES: usize = 512;

/// Server endpoint and credentials.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// API root, for example `https://chat.example.com/api/`.
    pub base_url: String,
    pub email: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn new(
        base_url: impl Into<String>,
        email: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            email: email.into(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("invalid server url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Transport that issues each API call as one HTTP request with basic auth.
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    email: String,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(config: ServerConfig) -> Result<Self, HttpTransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(client, config)
    }

    /// Use a caller-built client; `config.request_timeout` is ignored.
    pub fn with_client(client: Client, config: ServerConfig) -> Result<Self, HttpTransportError> {
        // Endpoint paths are relative, so the root must end with a slash to keep its last segment.
        let root = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let base_url = Url::parse(&root).map_err(|source| HttpTransportError::InvalidUrl {
            url: config.base_url.clone(),
            source,
        })?;

        Ok(Self {
            client,
            base_url,
            email: config.email,
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Other(format!("invalid endpoint '{path}': {err}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<String, TransportError> {
        let url = self.endpoint(request.path)?;
        trace!(%url, method = ?request.method, "sending request");

        let builder = match request.method {
            Method::Get => self.client.get(url).query(&request.params),
            Method::Post => self.client.post(url).form(&request.params),
        };
        let response = builder
            .basic_auth(&self.email, Some(&self.api_key))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            debug!(status = status.as_u16(), path = request.path, "server rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// The server's `msg` field when the body is a JSON error, else the body
/// truncated on a character boundary.
fn error_message(body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body)
        && let Some(Value::String(msg)) = fields.get("msg")
    {
        return msg.clone();
    }

    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_owned();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_owned()
}
