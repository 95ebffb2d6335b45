//! REST client for the household API with the credential context attached.
//!
//! ARCHITECTURE
//! ============
//! Every call goes through `dispatch`, which sets the JSON content type,
//! merges caller headers, attaches the stored session cookie (unless the
//! caller set `Cookie` itself) and records any `Set-Cookie` the server
//! returns. Authenticated calls that come back 401
//! wipe the persisted credentials; the in-memory session is left to
//! `SessionStore`, which routes its own requests through `invalidate`.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx responses become `RequestError::Status` carrying the server's
//! `message` when one is present. Cookie persistence failures are logged and
//! never fail the request that triggered them. No retries happen here.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cookies::SessionCookies;
use super::types::ErrorBody;
use crate::config::ClientConfig;
use crate::storage::{COOKIE_KEY, IDENTITY_KEY, SecureStorage, StorageError};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The request body could not be serialized.
    #[error("request body encode failed: {0}")]
    Encode(String),

    /// A caller-supplied header name or value was rejected.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The request never produced an HTTP response.
    #[error("http request failed: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("{}", status_error_text(*status, message.as_deref()))]
    Status { status: u16, message: Option<String> },

    /// A 2xx body was not the expected JSON.
    #[error("response parse failed: {0}")]
    Decode(String),
}

impl RequestError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Message supplied by the server in the error body, if any.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

fn request_failed_message(status: u16) -> String {
    format!("Request failed with status {status}")
}

fn status_error_text(status: u16, message: Option<&str>) -> String {
    message.map_or_else(|| request_failed_message(status), str::to_owned)
}

// =============================================================================
// REQUEST
// =============================================================================

/// A single API call: method, endpoint path, optional JSON body and extra headers.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    method: Method,
    endpoint: String,
    body: Option<String>,
    headers: HeaderMap,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self { method, endpoint: endpoint.into(), body: None, headers: HeaderMap::new() }
    }

    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    #[must_use]
    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    #[must_use]
    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    #[must_use]
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Attach `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Encode`] if `body` cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, RequestError> {
        let encoded = serde_json::to_string(body).map_err(|e| RequestError::Encode(e.to_string()))?;
        self.body = Some(encoded);
        Ok(self)
    }

    /// Add a caller header. Caller headers override the defaults on name clash.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a caller header from untrusted strings.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidHeader`] if the name or value is not a
    /// valid HTTP header.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, RequestError> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| RequestError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| RequestError::InvalidHeader(format!("{}: {e}", name.as_str())))?;
        Ok(self.header(name, value))
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Whether a 401 response should wipe the persisted credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CredentialPolicy {
    Authenticated,
    Anonymous,
}

struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    storage: Arc<dyn SecureStorage>,
    cookies: Arc<Mutex<SessionCookies>>,
}

impl ApiClient {
    /// Build a client for `config.base_url`, persisting credentials into `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::HttpClientBuild`] if the reqwest client fails to build.
    pub fn new(config: &ClientConfig, storage: Arc<dyn SecureStorage>) -> Result<Self, RequestError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeouts.request {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.timeouts.connect {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| RequestError::HttpClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            storage,
            cookies: Arc::new(Mutex::new(SessionCookies::default())),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn SecureStorage> {
        &self.storage
    }

    /// Load the persisted session cookie into memory. Read failures are
    /// logged and leave the client without a cookie.
    pub async fn restore_cookies(&self) {
        match self.storage.get(COOKIE_KEY).await {
            Ok(Some(raw)) => {
                *self.cookies.lock().await = SessionCookies::from_header(&raw);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read persisted session cookie"),
        }
    }

    /// Current `Cookie` header value, if a session cookie is held.
    pub async fn cookie_header(&self) -> Option<String> {
        self.cookies.lock().await.header_value()
    }

    /// Drop the session cookie and delete both persisted credential keys.
    ///
    /// Both deletes are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] hit while deleting.
    pub async fn forget_credentials(&self) -> Result<(), StorageError> {
        let mut cookies = self.cookies.lock().await;
        cookies.clear();
        let identity = self.storage.delete(IDENTITY_KEY).await;
        let cookie = self.storage.delete(COOKIE_KEY).await;
        identity.and(cookie)
    }

    /// Send an authenticated request and return its JSON body.
    ///
    /// `DELETE` requests resolve to an empty JSON object on success.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Transport`] if no response arrives,
    /// [`RequestError::Status`] for a non-2xx status (a 401 also wipes the
    /// persisted credentials) and [`RequestError::Decode`] for a 2xx body
    /// that is not JSON.
    pub async fn send(&self, request: ApiRequest) -> Result<Value, RequestError> {
        let method = request.method.clone();
        let raw = self.dispatch(request, CredentialPolicy::Authenticated).await?;
        into_json(&method, raw)
    }

    /// Like [`ApiClient::send`], deserializing the body into `T`.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`]; a body that does not fit `T` is
    /// [`RequestError::Decode`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))
    }

    /// Send a request whose 401 must not wipe stored credentials (login, register).
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`], without the 401 side effect.
    pub async fn send_anonymous(&self, request: ApiRequest) -> Result<Value, RequestError> {
        let method = request.method.clone();
        let raw = self.dispatch(request, CredentialPolicy::Anonymous).await?;
        into_json(&method, raw)
    }

    /// Send an authenticated request and ignore the success body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Transport`] or [`RequestError::Status`] as
    /// [`ApiClient::send`] does.
    pub async fn send_no_content(&self, request: ApiRequest) -> Result<(), RequestError> {
        let raw = self.dispatch(request, CredentialPolicy::Authenticated).await?;
        ensure_success(&raw)
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    async fn dispatch(&self, request: ApiRequest, policy: CredentialPolicy) -> Result<RawResponse, RequestError> {
        let ApiRequest { method, endpoint, body, headers } = request;
        let url = self.url_for(&endpoint);
        let caller_cookie = headers.contains_key(COOKIE);

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .headers(headers);
        if !caller_cookie {
            if let Some(cookie) = self.cookie_header().await {
                builder = builder.header(COOKIE, cookie);
            }
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;
        let status = response.status();
        self.absorb_cookies(response.headers()).await;
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?
            .to_vec();

        debug!(%method, endpoint = %endpoint, status = status.as_u16(), "api request completed");

        if status == StatusCode::UNAUTHORIZED && policy == CredentialPolicy::Authenticated {
            warn!(endpoint = %endpoint, "unauthorized response; clearing stored credentials");
            if let Err(e) = self.forget_credentials().await {
                warn!(error = %e, "failed to clear stored credentials");
            }
        }

        Ok(RawResponse { status, body })
    }

    /// Persists under the jar lock so concurrent responses reach storage in
    /// the order they were applied.
    async fn absorb_cookies(&self, headers: &HeaderMap) {
        let mut cookies = self.cookies.lock().await;
        let mut changed = false;
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                changed |= cookies.apply_set_cookie(raw);
            }
        }
        if !changed {
            return;
        }

        let result = match cookies.header_value() {
            Some(header) => self.storage.set(COOKIE_KEY, &header).await,
            None => self.storage.delete(COOKIE_KEY).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist session cookie");
        }
    }
}

fn ensure_success(raw: &RawResponse) -> Result<(), RequestError> {
    if raw.status.is_success() {
        return Ok(());
    }
    Err(RequestError::Status {
        status: raw.status.as_u16(),
        message: ErrorBody::message_from(&raw.body),
    })
}

fn into_json(method: &Method, raw: RawResponse) -> Result<Value, RequestError> {
    ensure_success(&raw)?;
    if *method == Method::DELETE {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(&raw.body).map_err(|e| RequestError::Decode(e.to_string()))
}
