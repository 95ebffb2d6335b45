//! Wire-protocol DTOs for the auth endpoints.
//!
//! DESIGN
//! ======
//! `Identity` is both the server's success payload and the persisted
//! credential record, so one serde shape (camelCase `familyId`) serves both.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use serde::{Deserialize, Serialize};

/// The authenticated user's profile as held client-side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Server-assigned user identifier.
    pub id: i64,
    pub email: String,
    /// Display name.
    pub name: String,
    /// Opaque family grouping shared by members of one household.
    pub family_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
    /// Omitted to create a new family; present to join an existing one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_id: Option<&'a str>,
}

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Parse an error body, returning the message only when it is non-empty.
    pub(crate) fn message_from(bytes: &[u8]) -> Option<String> {
        serde_json::from_slice::<Self>(bytes)
            .ok()
            .and_then(|body| body.message)
            .filter(|m| !m.trim().is_empty())
    }
}
