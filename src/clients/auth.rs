use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub type AuthHeaders = HashMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no usable credential: {0}")]
    Unavailable(String),
    #[error("auth provider failed: {0}")]
    Provider(String),
}

/// What the provider gets to see when a downstream call is rejected.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: Option<String>,
}

/// Source of per-request credentials and the recovery policy for 401/403.
///
/// `get_auth_headers` is called right before every dispatch, retries
/// included; headers are never cached by the caller.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_auth_headers(&self) -> Result<AuthHeaders, AuthError>;

    /// Returns `Ok(true)` when the failed call should be attempted once more.
    async fn handle_auth_error(&self, failure: &AuthFailure) -> Result<bool, AuthError>;
}

pub fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

/// Fixed headers; never asks for a retry.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    headers: AuthHeaders,
}

impl StaticAuthProvider {
    pub fn new(headers: AuthHeaders) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn get_auth_headers(&self) -> Result<AuthHeaders, AuthError> {
        Ok(self.headers.clone())
    }

    async fn handle_auth_error(&self, failure: &AuthFailure) -> Result<bool, AuthError> {
        tracing::debug!(
            method = %failure.method,
            path = %failure.path,
            status = failure.status,
            "static credentials rejected; not retrying"
        );
        Ok(false)
    }
}
