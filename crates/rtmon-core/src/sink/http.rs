//! Keep-alive HTTP client for line-protocol writes.
//!
//! The client is either `Disconnected` or `Connected`. A send on a
//! disconnected client builds a pooled `reqwest` client first; `reset`
//! drops it, and with it any idle connection, so the caller can retry on a
//! fresh one. Every request runs under one total timeout covering name
//! resolution, connect, upload and the response body.

use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, trace};

use super::delivery::{Response, Transport, TransportError};

/// Write path used when the endpoint URL has none.
pub const DEFAULT_WRITE_PATH: &str = "/write?precision=ns";

/// Most of a response body kept for diagnostics.
const MAX_RESPONSE_BODY: u64 = 64 * 1024;

/// Error parsing an endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointError {
    pub message: String,
}

impl EndpointError {
    fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint: {}", self.message)
    }
}

impl std::error::Error for EndpointError {}

/// Remote write target: `http://host[:port][/path][?query]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Request target including any query string.
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let url = url.trim();
        let rest = if let Some(rest) = url.strip_prefix("http://") {
            rest
        } else if url.starts_with("https://") {
            return Err(EndpointError::new("https is not supported"));
        } else if url.contains("://") {
            return Err(EndpointError::new(format!("unsupported scheme in '{}'", url)));
        } else {
            url
        };

        let (authority, target) = match rest.find(['/', '?']) {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(EndpointError::new(format!("missing host in '{}'", url)));
        }

        let (host, port) = split_host_port(authority)?;

        let path = match target {
            "" | "/" => DEFAULT_WRITE_PATH.to_string(),
            t if t.starts_with('?') => format!("/{}", t),
            t => t.to_string(),
        };

        Ok(Self { host, port, path })
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.host_header(), self.path)
    }
}

fn split_host_port(authority: &str) -> Result<(String, u16), EndpointError> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| EndpointError::new(format!("invalid port '{}'", p)))
    };

    // [v6addr]:port
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| EndpointError::new("unterminated '[' in host"))?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if after.is_empty() => 80,
            None => return Err(EndpointError::new(format!("unexpected '{}' after host", after))),
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), parse_port(port)?)),
        Some(_) => Err(EndpointError::new("missing host")),
        None => Ok((authority.to_string(), 80)),
    }
}

/// Timeouts and credentials for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    /// Total time allowed for one request, from resolving the host to the
    /// end of the response body.
    pub request_timeout: Duration,
    /// Sent as `Authorization: Token <token>`.
    pub token: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            token: None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Protocol(e.to_string())
        }
    }
}

enum Connection {
    Disconnected,
    Connected(Client),
}

/// Keep-alive HTTP client posting to a single endpoint.
pub struct HttpClient {
    endpoint: Endpoint,
    url: String,
    options: HttpOptions,
    connection: Connection,
}

impl HttpClient {
    pub fn new(endpoint: Endpoint, options: HttpOptions) -> Self {
        Self {
            url: endpoint.to_string(),
            endpoint,
            options,
            connection: Connection::Disconnected,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection, Connection::Connected(_))
    }

    fn connect(&self) -> Result<Client, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let Some(token) = &self.options.token {
            let mut value = HeaderValue::from_str(&format!("Token {}", token))
                .map_err(|_| TransportError::Connect("token is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .connect_timeout(self.options.connect_timeout)
            .timeout(self.options.request_timeout)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .default_headers(headers)
            .build()?;
        debug!(endpoint = %self.endpoint, "http client ready");
        Ok(client)
    }

    fn client(&mut self) -> Result<Client, TransportError> {
        if let Connection::Connected(client) = &self.connection {
            return Ok(client.clone());
        }
        let client = self.connect()?;
        self.connection = Connection::Connected(client.clone());
        Ok(client)
    }
}

impl Transport for HttpClient {
    fn send(&mut self, body: &[u8]) -> Result<Response, TransportError> {
        let response = self.client()?.post(&self.url).body(body.to_vec()).send()?;
        let status = response.status().as_u16();

        let mut excerpt = Vec::new();
        response
            .take(MAX_RESPONSE_BODY)
            .read_to_end(&mut excerpt)
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut => TransportError::Timeout,
                _ => TransportError::Io(e),
            })?;
        trace!(endpoint = %self.endpoint, status, "response received");

        Ok(Response {
            status,
            body: excerpt,
        })
    }

    fn reset(&mut self) {
        self.connection = Connection::Disconnected;
    }
}
