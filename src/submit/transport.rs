//! HTTP transport to the scanning engine

use crate::config::CollectorConfig;
use crate::error::CollectorError;
use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("diff-collector/", env!("CARGO_PKG_VERSION"));

/// Status, `Retry-After` header and body of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }
}

/// Request/response seam for the engine
///
/// Any HTTP status is a reply; only connection-level failures are errors.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpReply, CollectorError>;

    fn get(&self, endpoint: &str) -> Result<HttpReply, CollectorError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    pub fn from_config(config: &CollectorConfig) -> Result<Self, CollectorError> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT);

        builder = match &config.proxy {
            Some(proxy) => builder.proxy(
                ureq::Proxy::new(proxy)
                    .map_err(|e| CollectorError::Config(format!("proxy '{}': {}", proxy, e)))?,
            ),
            None => builder.try_proxy_from_env(true),
        };

        if config.insecure || !config.ca_files.is_empty() {
            builder = builder.tls_connector(Arc::new(tls_connector(config)?));
        }

        Ok(Self {
            agent: builder.build(),
            base_url: config.server_url().to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

fn tls_connector(config: &CollectorConfig) -> Result<native_tls::TlsConnector, CollectorError> {
    let mut builder = native_tls::TlsConnector::builder();
    if config.insecure {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    for ca_file in &config.ca_files {
        let pem = fs::read(ca_file).map_err(|e| {
            CollectorError::Config(format!("CA file {}: {}", ca_file.display(), e))
        })?;
        let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
            CollectorError::Config(format!("CA file {}: {}", ca_file.display(), e))
        })?;
        builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|e| CollectorError::Config(format!("TLS setup failed: {}", e)))
}

fn into_reply(result: Result<ureq::Response, ureq::Error>) -> Result<HttpReply, CollectorError> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(CollectorError::TransientSubmission(transport.to_string()))
        }
    };
    let status = response.status();
    let retry_after = response.header("Retry-After").map(str::to_string);
    let mut body = String::new();
    response
        .into_reader()
        .take(16 * 1024 * 1024)
        .read_to_string(&mut body)
        .map_err(|e| CollectorError::TransientSubmission(format!("reading response: {}", e)))?;
    Ok(HttpReply {
        status,
        retry_after,
        body,
    })
}

impl Transport for UreqTransport {
    fn post(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpReply, CollectorError> {
        let mut request = self
            .agent
            .post(&self.url(endpoint))
            .set("Content-Type", content_type);
        for (key, value) in query {
            request = request.query(key, value);
        }
        into_reply(request.send_bytes(body))
    }

    fn get(&self, endpoint: &str) -> Result<HttpReply, CollectorError> {
        into_reply(self.agent.get(&self.url(endpoint)).call())
    }
}

/// A `multipart/form-data` body with a single `file` part
pub struct MultipartBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl MultipartBody {
    pub fn single_file(filename: &str, content: &[u8]) -> Self {
        let boundary = format!("------------------------{}", Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(content.len() + 256);
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                sanitize_filename(filename)
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Self {
            content_type: format!("multipart/form-data; boundary={}", boundary),
            body,
        }
    }
}

/// Characters that would break the Content-Disposition header
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | ';' | '\r' | '\n' => '_',
            c => c,
        })
        .collect()
}
