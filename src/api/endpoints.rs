//! Typed endpoint helpers on top of `ApiGateway::request`.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;

use super::envelope::Payload;
use super::gateway::ApiGateway;
use super::request::ApiRequest;
use crate::cache::{CachePolicy, Mutation};
use crate::error::ApiError;
use crate::profile::{ProfileApi, TravelProfile};
use crate::session::{AuthApi, AuthGrant, Credential, Identity};

/// Coordinates and filters for spot lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpotQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: Option<f64>,
    pub spot_type: Option<String>,
}

impl SpotQuery {
    pub fn near(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Default::default()
        }
    }

    fn apply(&self, request: ApiRequest) -> ApiRequest {
        let mut request = request
            .query("lat", self.latitude)
            .query("lng", self.longitude);
        if let Some(radius) = self.radius_km {
            request = request.query("radius", radius);
        }
        if let Some(spot_type) = &self.spot_type {
            request = request.query("type", spot_type);
        }
        request
    }
}

fn profile_path(user_id: &str) -> String {
    format!("/users/{user_id}/profile")
}

impl ApiGateway {
    /// `GET /auth/me`: validates the attached credential. Never cached.
    pub async fn get_identity(&self) -> Result<Identity, ApiError> {
        self.request(ApiRequest::get("/auth/me")).await?.decode()
    }

    /// `POST /auth/magic-link`: ask the backend to email a sign-in link.
    pub async fn request_magic_link(&self, email: &str) -> Result<Option<String>, ApiError> {
        let payload = self
            .request(ApiRequest::post("/auth/magic-link").body(json!({ "email": email })))
            .await?;
        Ok(payload.message)
    }

    /// `POST /auth/verify`: exchange a magic-link token for a credential.
    pub async fn verify_magic_link(&self, token: &str) -> Result<AuthGrant, ApiError> {
        self.request(ApiRequest::post("/auth/verify").body(json!({ "token": token })))
            .await?
            .decode()
    }

    /// `POST /auth/refresh`: trade the attached credential for a new one.
    pub async fn refresh_token(&self) -> Result<Credential, ApiError> {
        self.request(ApiRequest::post("/auth/refresh")).await?.decode()
    }

    /// `GET /users/:id/profile`.
    pub async fn get_profile(&self, user_id: &str) -> Result<TravelProfile, ApiError> {
        self.request(ApiRequest::get(profile_path(user_id)).cache(CachePolicy::Ttl(self.ttls.profile)))
            .await?
            .decode()
    }

    /// `PUT /users/:id/profile`.
    pub async fn put_profile(&self, profile: &TravelProfile) -> Result<TravelProfile, ApiError> {
        let body = serde_json::to_value(profile)
            .map_err(|e| ApiError::unknown(format!("Unserializable profile: {e}")))?;
        self.request(
            ApiRequest::put(profile_path(&profile.user_id))
                .body(body)
                .mutation(Mutation::UpdateProfile),
        )
        .await?
        .decode()
    }

    /// `GET /spots` near a position. Short TTL: results depend on where the
    /// user is standing.
    pub async fn spots(&self, query: &SpotQuery) -> Result<Payload, ApiError> {
        let request = query.apply(ApiRequest::get("/spots"));
        self.request(request.cache(CachePolicy::Ttl(self.ttls.spots)))
            .await
    }

    /// `GET /spots/filtered`.
    pub async fn filtered_spots(&self, query: &SpotQuery) -> Result<Payload, ApiError> {
        let request = query.apply(ApiRequest::get("/spots/filtered"));
        self.request(request.cache(CachePolicy::Ttl(self.ttls.spots)))
            .await
    }

    /// `GET /spots/:id`: stable catalog read.
    pub async fn spot(&self, spot_id: &str) -> Result<Payload, ApiError> {
        self.request(
            ApiRequest::get(format!("/spots/{spot_id}")).cache(CachePolicy::Ttl(self.ttls.catalog)),
        )
        .await
    }

    /// `POST /spots`.
    pub async fn create_spot(&self, spot: serde_json::Value) -> Result<Payload, ApiError> {
        self.request(ApiRequest::post("/spots").body(spot).mutation(Mutation::CreateSpot))
            .await
    }
}

#[async_trait]
impl AuthApi for ApiGateway {
    fn set_credential(&self, credential: Option<&Credential>) -> u64 {
        let token: Option<SecretString> = credential.map(|c| c.token.clone());
        ApiGateway::set_credential(self, token)
    }

    fn credential_epoch(&self) -> u64 {
        ApiGateway::credential_epoch(self)
    }

    async fn fetch_identity(&self) -> Result<Identity, ApiError> {
        self.get_identity().await
    }

    async fn refresh_credential(&self) -> Result<Credential, ApiError> {
        self.refresh_token().await
    }
}

#[async_trait]
impl ProfileApi for ApiGateway {
    async fn fetch_profile(&self, user_id: &str) -> Result<TravelProfile, ApiError> {
        self.get_profile(user_id).await
    }

    async fn save_profile(&self, profile: &TravelProfile) -> Result<TravelProfile, ApiError> {
        self.put_profile(profile).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::ExposeSecret;

    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ApiErrorKind;
    use crate::test_support::ScriptedTransport;

    fn profile_json() -> serde_json::Value {
        json!({
            "userId": "u1",
            "selectedModes": ["cycling"],
            "primaryMode": "cycling",
            "onboardingCompleted": true,
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn verify_returns_grant() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "POST",
            "/auth/verify",
            200,
            json!({"data": {
                "token": "tok-1",
                "expiresAt": "2030-01-01T00:00:00Z",
                "user": {"id": "u1", "email": "a@example.com"}
            }}),
        );
        let gateway = ApiGateway::new(transport.clone(), &ClientConfig::default());

        let grant = gateway.verify_magic_link("link-token").await.unwrap();
        assert_eq!(grant.user.id, "u1");
        assert_eq!(grant.credential.token.expose_secret(), "tok-1");
        assert_eq!(
            transport.last_request().unwrap().body.unwrap()["token"],
            "link-token"
        );
    }

    #[tokio::test]
    async fn magic_link_request_sends_email_and_returns_message() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "POST",
            "/auth/magic-link",
            200,
            json!({"data": null, "message": "Check your inbox"}),
        );
        let gateway = ApiGateway::new(transport.clone(), &ClientConfig::default());

        let message = gateway.request_magic_link("rider@example.com").await.unwrap();
        assert_eq!(message.as_deref(), Some("Check your inbox"));

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.body.unwrap(), json!({"email": "rider@example.com"}));
        assert!(sent.authorization.is_none());
    }

    #[tokio::test]
    async fn profile_read_is_cached_until_saved() {
        let transport = ScriptedTransport::new();
        transport.respond("GET", "/users/u1/profile", 200, json!({"data": profile_json()}));
        transport.respond("PUT", "/users/u1/profile", 200, json!({"data": profile_json()}));
        let gateway = ApiGateway::new(transport.clone(), &ClientConfig::default());

        let profile = gateway.get_profile("u1").await.unwrap();
        gateway.get_profile("u1").await.unwrap();
        assert_eq!(transport.calls_to("GET", "/users/u1/profile"), 1);

        gateway.put_profile(&profile).await.unwrap();
        gateway.get_profile("u1").await.unwrap();
        assert_eq!(transport.calls_to("GET", "/users/u1/profile"), 2);
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let transport = ScriptedTransport::new();
        transport.respond(
            "GET",
            "/users/u1/profile",
            404,
            json!({"error": {"message": "Profile not found"}}),
        );
        let gateway = ApiGateway::new(transport, &ClientConfig::default());

        let err = gateway.get_profile("u1").await.unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::NotFound);
    }

    #[tokio::test]
    async fn spot_query_parameters() {
        let transport = ScriptedTransport::new();
        transport.respond("GET", "/spots/filtered", 200, json!({"data": []}));
        let gateway = ApiGateway::new(transport.clone(), &ClientConfig::default());

        let query = SpotQuery {
            radius_km: Some(25.0),
            spot_type: Some("bridge".into()),
            ..SpotQuery::near(52.5, 13.4)
        };
        gateway.filtered_spots(&query).await.unwrap();

        let sent = transport.last_request().unwrap();
        assert!(sent.query.contains(&("lat".into(), "52.5".into())));
        assert!(sent.query.contains(&("type".into(), "bridge".into())));
    }

    #[tokio::test]
    async fn auth_api_attaches_credential_token() {
        let transport = ScriptedTransport::new();
        transport.respond("GET", "/auth/me", 200, json!({"data": {"id": "u1", "email": "a@example.com"}}));
        let gateway = Arc::new(ApiGateway::new(transport.clone(), &ClientConfig::default()));
        let api: Arc<dyn AuthApi> = gateway.clone();

        let credential = Credential::new("tok-7", chrono::Utc::now() + chrono::Duration::hours(1));
        let epoch = api.set_credential(Some(&credential));
        assert_eq!(api.credential_epoch(), epoch);

        let identity = api.fetch_identity().await.unwrap();
        assert_eq!(identity.id, "u1");
        let sent = transport.last_request().unwrap();
        assert_eq!(sent.authorization.unwrap().expose_secret(), "tok-7");
    }
}
