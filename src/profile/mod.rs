//! Travel profile resolution and onboarding completeness.

pub mod model;
pub mod resolver;

use async_trait::async_trait;

use crate::error::ApiError;

pub use model::{ProfilePatch, ProfileState, TravelMode, TravelProfile};
pub use resolver::ProfileResolver;

/// Backend operations the resolver needs. Implemented by `ApiGateway`.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<TravelProfile, ApiError>;

    /// Persist the full profile; returns what the backend stored.
    async fn save_profile(&self, profile: &TravelProfile) -> Result<TravelProfile, ApiError>;
}
