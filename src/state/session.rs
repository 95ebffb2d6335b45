//! Session store: the single authority for "who is logged in".
//!
//! ARCHITECTURE
//! ============
//! `SessionStore` owns the `Session` value inside a `watch` channel. UI code
//! reads it with `snapshot()` or re-renders on `subscribe()`; only the store's
//! operations write it, always by replacing the value under the channel lock.
//! Each operation persists first and publishes second, both under `commit`,
//! so the stored record and the in-memory session always describe the same
//! operation and the last one to complete wins.
//!
//! TRADE-OFFS
//! ==========
//! Logout is pessimistic: if the server cannot be told, local state stays as
//! it is and the caller gets the error. A 401 from the logout endpoint is the
//! exception, since it means the server session is already gone.
//!
//! ERROR HANDLING
//! ==============
//! Restore never fails; unreadable or corrupted records are logged and the
//! session starts absent. Every other failure is returned to the caller and
//! recorded in `Session::error` for display.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::net::api::{ApiClient, ApiRequest, RequestError};
use crate::net::types::{Identity, LoginRequest, RegisterRequest};
use crate::state::cache::CacheInvalidator;
use crate::storage::{IDENTITY_KEY, SecureStorage, StorageError};

pub const LOGIN_ENDPOINT: &str = "/api/login";
pub const REGISTER_ENDPOINT: &str = "/api/register";
pub const LOGOUT_ENDPOINT: &str = "/api/logout";

// =============================================================================
// OPERATIONS & ERRORS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOperation {
    Login,
    Register,
    Logout,
}

impl AuthOperation {
    /// Localized title of the alert shown when this operation fails.
    #[must_use]
    pub fn alert_title(self) -> &'static str {
        match self {
            Self::Login => "Chyba přihlášení",
            Self::Register => "Chyba registrace",
            Self::Logout => "Chyba odhlášení",
        }
    }

    /// Localized message used when the server gives no reason.
    #[must_use]
    pub fn fallback_message(self) -> &'static str {
        match self {
            Self::Login => "Přihlášení selhalo",
            Self::Register => "Registrace selhala",
            Self::Logout => "Odhlášení selhalo",
        }
    }
}

impl fmt::Display for AuthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::Logout => "logout",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required credential field was empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The server rejected the operation or could not be reached.
    #[error("{message}")]
    Authentication { operation: AuthOperation, message: String },

    /// The server accepted the operation but returned an unusable identity.
    #[error("invalid identity payload: {0}")]
    InvalidIdentity(String),

    /// Persisting or clearing the credential record failed.
    #[error("secure storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    fn from_request(operation: AuthOperation, err: RequestError) -> Self {
        match err {
            RequestError::Status { message, .. } => Self::Authentication {
                operation,
                message: message.unwrap_or_else(|| operation.fallback_message().to_owned()),
            },
            RequestError::Decode(detail) => Self::InvalidIdentity(detail),
            other => Self::Authentication { operation, message: other.to_string() },
        }
    }
}

/// Why the persisted identity could not be read. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceReadError {
    #[error("secure storage read failed: {0}")]
    Storage(#[from] StorageError),
    #[error("persisted identity is corrupted: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Alert payload for the UI: which operation failed and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthFailure {
    pub operation: AuthOperation,
    pub message: String,
}

impl AuthFailure {
    #[must_use]
    pub fn title(&self) -> &'static str {
        self.operation.alert_title()
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message)
    }
}

// =============================================================================
// SESSION VALUE
// =============================================================================

/// Which screen tree the navigation root should show.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Loading,
    Auth,
    Main,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    /// True until restore completes and while any auth operation is in flight.
    pub loading: bool,
    /// Failure of the most recent auth operation, cleared when the next starts.
    pub error: Option<AuthFailure>,
}

impl Session {
    fn initial() -> Self {
        Self { identity: None, loading: true, error: None }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn route(&self) -> Route {
        if self.loading {
            Route::Loading
        } else if self.identity.is_some() {
            Route::Main
        } else {
            Route::Auth
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct SessionStore {
    api: ApiClient,
    storage: Arc<dyn SecureStorage>,
    cache: Arc<dyn CacheInvalidator>,
    state: watch::Sender<Session>,
    in_flight: AtomicUsize,
    commit: Mutex<()>,
}

impl SessionStore {
    /// Wrap `api`; credentials persist into the api client's storage.
    #[must_use]
    pub fn new(api: ApiClient, cache: Arc<dyn CacheInvalidator>) -> Self {
        let storage = Arc::clone(api.storage());
        let (state, _) = watch::channel(Session::initial());
        Self { api, storage, cache, state, in_flight: AtomicUsize::new(0), commit: Mutex::new(()) }
    }

    /// # Errors
    ///
    /// Returns [`RequestError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn from_config(
        config: &ClientConfig,
        storage: Arc<dyn SecureStorage>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Result<Self, RequestError> {
        Ok(Self::new(ApiClient::new(config, storage)?, cache))
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Observe session changes; the receiver starts at the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Read the persisted credential record. Blank records count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceReadError`] if storage cannot be read or the
    /// record is not a valid identity.
    pub async fn persisted_identity(&self) -> Result<Option<Identity>, PersistenceReadError> {
        let Some(raw) = self.storage.get(IDENTITY_KEY).await? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Load the persisted session at startup. Never fails: unreadable state
    /// is logged and leaves the session absent.
    pub async fn restore(&self) -> Option<Identity> {
        let _loading = self.begin();
        self.api.restore_cookies().await;

        let identity = {
            let _commit = self.commit.lock().await;
            let identity = match self.persisted_identity().await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "failed to restore persisted session");
                    None
                }
            };
            self.state.send_modify(|s| s.identity.clone_from(&identity));
            identity
        };

        match &identity {
            Some(found) => debug!(user_id = found.id, "session restored"),
            None => debug!("no persisted session"),
        }
        identity
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingField`] for an empty email or password,
    /// [`AuthError::Authentication`] when the server rejects the credentials or
    /// cannot be reached, [`AuthError::InvalidIdentity`] for an unusable
    /// success body and [`AuthError::Storage`] if the record cannot be saved.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.run(AuthOperation::Login, async {
            let email = required("email", email.trim())?;
            let password = required("password", password)?;
            let request = ApiRequest::post(LOGIN_ENDPOINT)
                .json(&LoginRequest { email, password })
                .map_err(|e| AuthError::from_request(AuthOperation::Login, e))?;
            self.authenticate(AuthOperation::Login, request).await
        })
        .await
    }

    /// Create an account. `family_id` joins an existing family; `None` or a
    /// blank value asks the server to create a new one.
    ///
    /// # Errors
    ///
    /// As [`SessionStore::login`]; `name` is also required.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        family_id: Option<&str>,
    ) -> Result<Identity, AuthError> {
        self.run(AuthOperation::Register, async {
            let email = required("email", email.trim())?;
            let password = required("password", password)?;
            let name = required("name", name.trim())?;
            let family_id = family_id.map(str::trim).filter(|f| !f.is_empty());
            let request = ApiRequest::post(REGISTER_ENDPOINT)
                .json(&RegisterRequest { email, password, name, family_id })
                .map_err(|e| AuthError::from_request(AuthOperation::Register, e))?;
            self.authenticate(AuthOperation::Register, request).await
        })
        .await
    }

    /// End the session on the server, then locally.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Authentication`] if the server cannot be told
    /// (local state is kept) and [`AuthError::Storage`] if the persisted
    /// credentials cannot be deleted.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.run(AuthOperation::Logout, async {
            match self.api.send_no_content(ApiRequest::post(LOGOUT_ENDPOINT)).await {
                Ok(()) => {}
                Err(e) if e.is_unauthorized() => {
                    debug!("server session already ended; clearing local session");
                }
                Err(e) => return Err(AuthError::from_request(AuthOperation::Logout, e)),
            }

            let _commit = self.commit.lock().await;
            self.api.forget_credentials().await?;
            self.clear_memory();
            info!("signed out");
            Ok(())
        })
        .await
    }

    /// Drop the session everywhere: persisted record, cookie, memory, caches.
    pub async fn invalidate(&self) {
        let _commit = self.commit.lock().await;
        if let Err(e) = self.api.forget_credentials().await {
            warn!(error = %e, "failed to clear persisted credentials");
        }
        self.clear_memory();
    }

    /// Authenticated request; a 401 invalidates the whole session.
    ///
    /// # Errors
    ///
    /// Returns the [`RequestError`] from [`ApiClient::send`].
    pub async fn send(&self, request: ApiRequest) -> Result<Value, RequestError> {
        let result = self.api.send(request).await;
        if let Err(e) = &result {
            if e.is_unauthorized() {
                warn!("session rejected by server; invalidating");
                self.invalidate().await;
            }
        }
        result
    }

    /// Like [`SessionStore::send`], deserializing the body into `T`.
    ///
    /// # Errors
    ///
    /// As [`SessionStore::send`]; a body that does not fit `T` is
    /// [`RequestError::Decode`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))
    }

    // -------------------------------------------------------------------------

    async fn authenticate(&self, operation: AuthOperation, request: ApiRequest) -> Result<Identity, AuthError> {
        let value = self
            .api
            .send_anonymous(request)
            .await
            .map_err(|e| AuthError::from_request(operation, e))?;
        let identity: Identity =
            serde_json::from_value(value).map_err(|e| AuthError::InvalidIdentity(e.to_string()))?;
        let encoded = serde_json::to_string(&identity).map_err(|e| AuthError::InvalidIdentity(e.to_string()))?;

        let _commit = self.commit.lock().await;
        self.storage.set(IDENTITY_KEY, &encoded).await?;
        self.state.send_modify(|s| s.identity = Some(identity.clone()));
        info!(user_id = identity.id, %operation, "signed in");
        Ok(identity)
    }

    async fn run<T, F>(&self, operation: AuthOperation, work: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        let mut loading = self.begin();
        let result = work.await;
        if let Err(e) = &result {
            warn!(%operation, error = %e, "auth operation failed");
            loading.fail(AuthFailure { operation, message: e.to_string() });
        }
        result
    }

    fn clear_memory(&self) {
        self.state.send_modify(|s| s.identity = None);
        self.cache.invalidate_all();
    }

    /// Mark an operation in flight until the returned guard drops, including
    /// when the caller abandons the operation's future.
    fn begin(&self) -> InFlight<'_> {
        self.state.send_modify(|s| {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            s.loading = true;
            s.error = None;
        });
        InFlight { store: self, failure: None }
    }

    fn finish(&self, failure: Option<AuthFailure>) {
        self.state.send_modify(|s| {
            let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            s.loading = remaining > 0;
            if failure.is_some() {
                s.error = failure;
            }
        });
    }
}

struct InFlight<'a> {
    store: &'a SessionStore,
    failure: Option<AuthFailure>,
}

impl InFlight<'_> {
    fn fail(&mut self, failure: AuthFailure) {
        self.failure = Some(failure);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.finish(self.failure.take());
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AuthError> {
    if value.is_empty() { Err(AuthError::MissingField(field)) } else { Ok(value) }
}
