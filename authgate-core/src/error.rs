//! Top-level error type for authgate.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Top-level error type encompassing all authgate failures.
///
/// Every variant is `Clone` so a single renewal outcome can be delivered to
/// each caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Error from the credential storage backend, propagated unchanged.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Network or timeout failure on a request, propagated unchanged and
    /// never retried automatically.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The renewal endpoint rejected the renewal credential. Always
    /// terminal: stored credentials are cleared and the session expires.
    #[error("credential renewal failed: {message}")]
    RenewalFailed {
        /// HTTP status returned by the renewal endpoint, when one was
        /// received at all.
        status: Option<u16>,
        message: String,
    },

    /// The caller leading the renewal was cancelled before it settled.
    /// Not terminal; a later request starts a fresh renewal cycle.
    #[error("credential renewal abandoned before completion")]
    RenewalAbandoned,

    /// The session can no longer be renewed; the user must sign in again.
    #[error("session expired, sign in required")]
    SessionExpired,

    /// The login endpoint rejected the submitted payload.
    #[error("login failed: {message}")]
    LoginFailed {
        status: Option<u16>,
        message: String,
    },

    /// A collaborator endpoint returned a body this crate could not decode.
    #[error("unexpected response shape: {message}")]
    InvalidResponse { message: String },
}

impl AuthError {
    /// True for errors that end the session and require a fresh login.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::RenewalFailed { .. })
    }
}
