//! Client-side session core for the household finance app.
//!
//! SYSTEM CONTEXT
//! ==============
//! `state::session` owns "who is logged in" and is the only writer of the
//! session value. `net::api` performs HTTP calls against the remote API with
//! the stored cookie context attached. `storage` abstracts the secure
//! on-device key/value store both of them persist into.

pub mod config;
pub mod net;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::ClientConfig;
pub use net::api::{ApiClient, ApiRequest, RequestError};
pub use net::types::Identity;
pub use state::cache::{CacheInvalidator, NoopCache, QueryCache};
pub use state::session::{AuthError, AuthFailure, AuthOperation, Route, Session, SessionStore};
pub use storage::{FileStorage, MemoryStorage, SecureStorage, StorageError};
