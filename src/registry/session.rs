//! HTTP session bound to one Pyxis host
//!
//! A [`Session`] owns a single reqwest connection pool, builds `/v1/` endpoint
//! URLs and retries failed attempts with exponential backoff. Retries apply to
//! every verb, POST and DELETE included; the client tolerates the duplicate
//! outcomes (409 on create, 404 on delete) that such retries can produce.

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::{PyxisError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Identity, Method, Request, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const API_VERSION: &str = "v1";
const USER_AGENT: &str = concat!("pubtools-pyxis/", env!("CARGO_PKG_VERSION"));

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Attaches credentials to an outgoing request before it is sent.
///
/// Called on every attempt, retries included, so credentials are always
/// present up front instead of after a 401 challenge.
pub trait RequestAuthenticator: Send + Sync + fmt::Debug {
    fn authorize(&self, request: &mut Request) -> Result<()>;
}

/// Transport options forwarded verbatim to the HTTP call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A response together with the method of the request that produced it.
#[derive(Debug)]
pub struct ApiResponse {
    method: Method,
    response: Response,
}

/// Fully read response body.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub status: StatusCode,
    pub url: String,
    /// Parsed JSON, or an empty object when the body is not JSON
    pub json: Value,
    pub text: String,
}

impl ApiResponse {
    pub fn new(method: Method, response: Response) -> Self {
        Self { method, response }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub async fn read_body(self) -> Result<ResponseBody> {
        let status = self.response.status();
        let url = self.response.url().to_string();
        let text = self.response.text().await?;
        let json = serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Map::new()));
        Ok(ResponseBody {
            status,
            url,
            json,
            text,
        })
    }
}

pub struct Session {
    id: SessionId,
    hostname: String,
    verify: bool,
    retry: RetryPolicy,
    has_identity: bool,
    authenticator: Option<Arc<dyn RequestAuthenticator>>,
    http: Option<Client>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("verify", &self.verify)
            .field("retry", &self.retry)
            .field("has_identity", &self.has_identity)
            .field("authenticator", &self.authenticator)
            .field("closed", &self.http.is_none())
            .finish()
    }
}

impl Session {
    pub fn new(hostname: impl Into<String>, retry: RetryPolicy, verify: bool) -> Result<Self> {
        let hostname = hostname.into();
        let session = Self {
            id: SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            hostname,
            verify,
            retry,
            has_identity: false,
            authenticator: None,
            http: Some(Self::build_http(verify, None)?),
        };
        url::Url::parse(&session.api_url("")).map_err(|e| {
            PyxisError::Config(format!("Invalid Pyxis hostname '{}': {}", session.hostname, e))
        })?;
        Ok(session)
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.hostname.clone(), config.retry_policy(), config.verify)
    }

    fn build_http(verify: bool, identity: Option<Identity>) -> Result<Client> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if !verify {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        Ok(builder.build()?)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn has_identity(&self) -> bool {
        self.has_identity
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn RequestAuthenticator>> {
        self.authenticator.as_ref()
    }

    /// Installs a client certificate. Rebuilds the connection pool.
    pub fn set_identity(&mut self, identity: Identity) -> Result<()> {
        self.http = Some(Self::build_http(self.verify, Some(identity))?);
        self.has_identity = true;
        Ok(())
    }

    pub fn set_authenticator(&mut self, authenticator: Arc<dyn RequestAuthenticator>) {
        self.authenticator = Some(authenticator);
    }

    /// Full URL of an API endpoint. Hosts without a scheme default to https.
    pub fn api_url(&self, endpoint: &str) -> String {
        let host = self.hostname.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/{}/{}", host, API_VERSION, endpoint)
        } else {
            format!("https://{}/{}/{}", host, API_VERSION, endpoint)
        }
    }

    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::GET, endpoint, options).await
    }

    pub async fn post(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::POST, endpoint, options).await
    }

    pub async fn put(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::PUT, endpoint, options).await
    }

    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(Method::DELETE, endpoint, options).await
    }

    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| PyxisError::Config(format!("{} has been closed", self.id)))?;

        let mut builder = http.request(method.clone(), self.api_url(endpoint));
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.json {
            builder = builder.json(body);
        }
        if !options.headers.is_empty() {
            builder = builder.headers(options.headers);
        }

        let response = self.send_with_retry(http, builder).await?;
        Ok(ApiResponse::new(method, response))
    }

    async fn send_with_retry(&self, http: &Client, builder: RequestBuilder) -> Result<Response> {
        let attempts = self.retry.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = builder
                .try_clone()
                .ok_or_else(|| {
                    PyxisError::Config("request body cannot be cloned for retries".to_string())
                })?
                .build()?;
            if let Some(authenticator) = &self.authenticator {
                authenticator.authorize(&mut request)?;
            }

            let method = request.method().clone();
            let url = request.url().clone();
            debug!(session = %self.id, attempt, %method, %url, "sending request");

            match http.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(session = %self.id, attempt, %method, %url, %status, "received response");

                    if RetryPolicy::is_retryable_status(status.as_u16()) && attempt < attempts {
                        let delay =
                            retry_after(&response).unwrap_or_else(|| self.retry.backoff(attempt));
                        warn!(
                            session = %self.id, %method, %url, %status,
                            retry = attempt, delay_ms = delay.as_millis() as u64,
                            "retryable status, backing off"
                        );
                        drop(response);
                        sleep(delay).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt < attempts && is_retryable_error(&err) {
                        let delay = self.retry.backoff(attempt);
                        warn!(
                            session = %self.id, %method, %url, error = %err,
                            retry = attempt, delay_ms = delay.as_millis() as u64,
                            "request failed, backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(PyxisError::Transport(err));
                }
            }
        }
    }

    /// Releases the connection pool. Later requests fail with a configuration error.
    pub fn close(&mut self) {
        if self.http.take().is_some() {
            debug!(session = %self.id, "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.http.is_none()
    }
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

/// Server-provided delay for statuses that carry a Retry-After header.
fn retry_after(response: &Response) -> Option<Duration> {
    match response.status().as_u16() {
        413 | 429 | 503 => response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs),
        _ => None,
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
