//! ApiGateway: single chokepoint for every backend call.
//!
//! Cacheable GETs go cache → coalescer → network. Everything else goes
//! straight to the network; successful mutations invalidate the cache
//! fragments their `Mutation` names. Callers only ever see `ApiError`.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::envelope::{Payload, decode_response};
use super::request::{ApiRequest, Method};
use super::transport::{HttpRequest, Transport};
use crate::cache::{RequestCoalescer, ResponseCache};
use crate::config::ClientConfig;
use crate::error::ApiError;

const EVENT_CAPACITY: usize = 16;

/// Signals other components react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A request made with credential epoch `epoch` was rejected with 401.
    Unauthorized { epoch: u64 },
}

/// TTLs for the endpoint families the typed helpers use.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTtls {
    pub spots: Duration,
    pub catalog: Duration,
    pub profile: Duration,
}

impl From<&ClientConfig> for EndpointTtls {
    fn from(config: &ClientConfig) -> Self {
        Self {
            spots: config.spots_ttl,
            catalog: config.catalog_ttl,
            profile: config.profile_ttl,
        }
    }
}

/// Read-only mirror of the session credential. `epoch` increases on every
/// change so late 401s from an older token can be told apart.
struct AttachedCredential {
    token: Option<SecretString>,
    epoch: u64,
}

pub struct ApiGateway {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache<Payload>>,
    coalescer: RequestCoalescer<Payload, ApiError>,
    credential: Arc<RwLock<AttachedCredential>>,
    events: broadcast::Sender<GatewayEvent>,
    pub(crate) ttls: EndpointTtls,
}

impl ApiGateway {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            cache: Arc::new(ResponseCache::new()),
            coalescer: RequestCoalescer::new(),
            credential: Arc::new(RwLock::new(AttachedCredential {
                token: None,
                epoch: 0,
            })),
            events,
            ttls: EndpointTtls::from(config),
        }
    }

    /// Replace the attached bearer token. Clearing it also drops every
    /// cached response, since cached payloads belong to the previous user.
    /// Returns the new credential epoch.
    pub fn set_credential(&self, token: Option<SecretString>) -> u64 {
        let clearing = token.is_none();
        let epoch = {
            let mut credential = self
                .credential
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            credential.token = token;
            credential.epoch += 1;
            credential.epoch
        };
        if clearing {
            self.cache.invalidate(None);
        }
        debug!(epoch, attached = !clearing, "Gateway credential updated");
        epoch
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }

    pub fn credential_epoch(&self) -> u64 {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .epoch
    }

    /// Subscribe to gateway events (401s observed on authenticated calls).
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Issue a request under the gateway's cache and coalescing policy.
    pub async fn request(&self, request: ApiRequest) -> Result<Payload, ApiError> {
        match (request.method, request.cache.ttl()) {
            (Method::Get, Some(ttl)) => self.cached_get(request, ttl).await,
            _ => self.send_direct(request).await,
        }
    }

    async fn cached_get(&self, request: ApiRequest, ttl: Duration) -> Result<Payload, ApiError> {
        let key = request.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        debug!(key = %key, "Cache miss");

        let (http, epoch) = self.prepare(request);
        let call = NetworkCall {
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
        };
        let cache = Arc::clone(&self.cache);
        let credential = Arc::clone(&self.credential);
        let slot_key = key.clone();

        self.coalescer
            .dedupe(&key.scoped(epoch), move || async move {
                // A call for this key may have finished between the cache
                // check above and this slot being created.
                if let Some(hit) = cache.get(&slot_key) {
                    return Ok(hit);
                }
                let payload = call.execute(http, epoch).await?;
                // `set_credential` bumps the epoch under the write lock and
                // clears the cache afterwards.
                let credential = credential.read().unwrap_or_else(PoisonError::into_inner);
                if credential.epoch == epoch {
                    // Must land before the pending slot is released.
                    cache.set(slot_key, payload.clone(), ttl);
                } else {
                    debug!(key = %slot_key, "Credential changed during request; not caching");
                }
                Ok(payload)
            })
            .await
    }

    async fn send_direct(&self, request: ApiRequest) -> Result<Payload, ApiError> {
        let mutation = request.mutation;
        let (http, epoch) = self.prepare(request);
        let call = NetworkCall {
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
        };

        let payload = call.execute(http, epoch).await?;

        if let Some(mutation) = mutation {
            let removed: usize = mutation
                .invalidates()
                .iter()
                .map(|fragment| self.cache.invalidate(Some(fragment)))
                .sum();
            debug!(?mutation, removed, "Mutation applied; cache invalidated");
        }
        Ok(payload)
    }

    fn prepare(&self, request: ApiRequest) -> (HttpRequest, u64) {
        let credential = self
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let http = HttpRequest {
            method: request.method,
            path: request.path,
            query: request.query,
            body: request.body,
            authorization: credential.token.clone(),
        };
        (http, credential.epoch)
    }
}

/// Owned handles for one round-trip, so it can run inside a shared future.
struct NetworkCall {
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<GatewayEvent>,
}

impl NetworkCall {
    async fn execute(&self, request: HttpRequest, epoch: u64) -> Result<Payload, ApiError> {
        let authenticated = request.authorization.is_some();
        let method = request.method;
        let path = request.path.clone();

        let response = self.transport.send(request).await.map_err(|e| {
            warn!(%method, path = %path, error = %e, "Transport failed");
            ApiError::from(e)
        })?;

        let result = decode_response(&response);
        if let Err(err) = &result {
            debug!(%method, path = %path, status = response.status, kind = %err.kind, "Request failed");
            if err.is_unauthorized() && authenticated {
                // Ok if nobody is listening.
                let _ = self.events.send(GatewayEvent::Unauthorized { epoch });
            }
        }
        result
    }
}
