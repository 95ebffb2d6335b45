//! Networking modules for the remote household API.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` performs REST calls with the credential context attached, `cookies`
//! tracks the server session cookie, and `types` defines the wire schema.

pub mod api;
pub mod cookies;
pub mod types;
