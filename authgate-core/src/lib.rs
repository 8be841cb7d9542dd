//! # Authgate Core
//!
//! Client-side session credential management with single-flight renewal.
//!
//! This crate provides:
//! - Pluggable key-value storage for an access/renewal token pair
//! - A single-flight coordinator so concurrent authorization failures
//!   trigger at most one renewal against the (often single-use) renewal
//!   token
//! - A request gateway that attaches credentials, renews on 401, and
//!   retries the original request exactly once
//! - A session controller exposing the login/logout state machine and a
//!   read-only snapshot for UI bindings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use authgate_core::{MemoryStore, ReqwestTransport, SessionConfig, SessionController};
//! use serde::{Deserialize, Serialize};
//! use url::Url;
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User { id: String }
//!
//! # async fn example() -> Result<(), authgate_core::AuthError> {
//! let config = SessionConfig::new(
//!     Url::parse("https://api.example.com/auth/login").unwrap(),
//!     Url::parse("https://api.example.com/auth/refresh").unwrap(),
//! );
//! let session: SessionController<User, _, _> =
//!     SessionController::new(config, MemoryStore::new(), ReqwestTransport::new());
//!
//! session.initialize().await?;
//! session.login(&serde_json::json!({"email": "a@b.c", "password": "pw"})).await?;
//!
//! // Subsequent requests stay authorized as the access token expires.
//! let data = session.gateway()
//!     .get(Url::parse("https://api.example.com/data").unwrap())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use config::{InitPolicy, SessionConfig};

pub use coordinator::{RenewalCoordinator, RenewalOutcome};

pub use credentials::CredentialStore;

pub use error::AuthError;

pub use gateway::{RequestGateway, SessionExpiredCallback};

pub use session::{SessionController, SessionPhase, SessionSnapshot};

pub use store::{create_store, MemoryStore, Secret, StorageBackend, StoreError};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use transport::{
    HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError,
};
