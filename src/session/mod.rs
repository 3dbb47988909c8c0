//! Session: credential persistence and identity resolution.

pub mod model;
pub mod store;

use async_trait::async_trait;

use crate::error::ApiError;

pub use model::{AuthGrant, Credential, Identity, SessionState};
pub use store::SessionStore;

/// Backend operations the session needs. Implemented by `ApiGateway`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Mirror the credential into outbound requests. Returns the new
    /// credential epoch.
    fn set_credential(&self, credential: Option<&Credential>) -> u64;

    /// Epoch of the credential currently attached.
    fn credential_epoch(&self) -> u64;

    /// Validate the attached credential and return its identity.
    async fn fetch_identity(&self) -> Result<Identity, ApiError>;

    /// Exchange the attached credential for a fresh one.
    async fn refresh_credential(&self) -> Result<Credential, ApiError>;
}
