//! SessionStore: owns the credential and resolves who the user is.
//!
//! Every operation that changes the session bumps a generation counter;
//! async work captures the generation when it starts and drops its result
//! if a newer operation has begun since. Writes to persisted storage are
//! serialized through `write_lock` and re-check the generation under it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::AuthApi;
use super::model::{Credential, Identity, SessionState};
use crate::api::GatewayEvent;
use crate::storage::{DeviceStorage, keys, load_json, save_json};

/// What resolving a stored credential concluded.
enum Resolution {
    Authenticated(Identity),
    /// `forget` drops the persisted credential as unusable.
    Anonymous { forget: bool },
}

pub struct SessionStore {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn DeviceStorage>,
    state: watch::Sender<SessionState>,
    credential: StdMutex<Option<Credential>>,
    generation: AtomicU64,
    write_lock: Mutex<()>,
    // Serializes 401 handling.
    refresh_lock: Mutex<()>,
    // Generation whose single refresh has been spent.
    refreshed_for: StdMutex<Option<u64>>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn AuthApi>, storage: Arc<dyn DeviceStorage>) -> Self {
        let (state, _rx) = watch::channel(SessionState::Unknown);
        Self {
            api,
            storage,
            state,
            credential: StdMutex::new(None),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            refresh_lock: Mutex::new(()),
            refreshed_for: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    /// Observe session transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            info!(from = %previous, to = %next, "Session transition");
        }
    }

    fn set_credential(&self, credential: Option<Credential>) {
        self.api.set_credential(credential.as_ref());
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    /// Resolve the persisted credential, if any, into a routable state.
    ///
    /// Never leaves the store in `Unknown`: every failure ends `Anonymous`.
    /// Calling this after the store has left `Unknown` is a no-op.
    pub async fn initialize(&self) -> SessionState {
        let started = self.state.send_if_modified(|state| {
            if *state == SessionState::Unknown {
                *state = SessionState::Authenticating;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = %self.state(), "Session already initialized");
            return self.state();
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let resolution = self.resolve_stored(generation).await;
        self.finish_initialize(generation, resolution).await;
        self.state()
    }

    async fn resolve_stored(&self, generation: u64) -> Resolution {
        let credential = match load_json::<Credential>(&*self.storage, keys::AUTH_TOKEN).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("No stored credential");
                return Resolution::Anonymous { forget: false };
            }
            Err(e) => {
                warn!(error = %e, "Stored credential unreadable; discarding");
                return Resolution::Anonymous { forget: true };
            }
        };

        if credential.is_expired() {
            info!(expired_at = %credential.expires_at, "Stored credential expired");
            return Resolution::Anonymous { forget: true };
        }

        {
            let _guard = self.write_lock.lock().await;
            if !self.is_current(generation) {
                return Resolution::Anonymous { forget: false };
            }
            self.set_credential(Some(credential));
        }

        match self.api.fetch_identity().await {
            Ok(identity) => Resolution::Authenticated(identity),
            Err(e) if e.is_unauthorized() => {
                info!(error = %e, "Stored credential rejected");
                Resolution::Anonymous { forget: true }
            }
            Err(e) => {
                warn!(error = %e, "Could not validate stored credential");
                Resolution::Anonymous { forget: false }
            }
        }
    }

    async fn finish_initialize(&self, generation: u64, resolution: Resolution) {
        let _guard = self.write_lock.lock().await;
        if !self.is_current(generation) {
            debug!("Session changed during initialize; discarding result");
            return;
        }

        match resolution {
            Resolution::Authenticated(identity) => {
                if let Err(e) = save_json(&*self.storage, keys::AUTH_USER, &identity).await {
                    warn!(error = %e, "Failed to persist identity");
                }
                self.transition(SessionState::Authenticated(identity));
            }
            Resolution::Anonymous { forget } => {
                if forget {
                    self.clear_persisted().await;
                }
                self.set_credential(None);
                self.transition(SessionState::Anonymous);
            }
        }
    }

    /// Adopt a freshly issued credential.
    ///
    /// A repeat call with the same identity and token is a no-op.
    pub async fn sign_in(&self, credential: Credential, identity: Identity) {
        if self.is_signed_in_as(&credential, &identity) {
            debug!(user_id = %identity.id, "Already signed in");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock().await;
        if !self.is_current(generation) {
            debug!("Sign-in superseded");
            return;
        }

        if let Err(e) = save_json(&*self.storage, keys::AUTH_TOKEN, &credential).await {
            warn!(error = %e, "Failed to persist credential");
        }
        if let Err(e) = save_json(&*self.storage, keys::AUTH_USER, &identity).await {
            warn!(error = %e, "Failed to persist identity");
        }
        self.set_credential(Some(credential));
        self.transition(SessionState::Authenticated(identity));
    }

    fn is_signed_in_as(&self, credential: &Credential, identity: &Identity) -> bool {
        let same_identity = self.state.borrow().identity() == Some(identity);
        let same_token = self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|current| current.same_token(credential));
        same_identity && same_token
    }

    /// Forget the credential everywhere and become `Anonymous`.
    pub async fn sign_out(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock().await;
        if !self.is_current(generation) {
            return;
        }

        self.clear_persisted().await;
        self.set_credential(None);
        self.transition(SessionState::Anonymous);
    }

    async fn clear_persisted(&self) {
        for key in [keys::AUTH_TOKEN, keys::AUTH_USER, keys::TRAVEL_PROFILE] {
            if let Err(e) = self.storage.remove(key).await {
                warn!(key, error = %e, "Failed to clear persisted value");
            }
        }
    }

    /// React to a 401 seen on a request made with credential `epoch`.
    ///
    /// The first 401 of a session triggers one refresh. A failed refresh,
    /// or a further 401 after the refresh, signs the user out.
    pub async fn handle_unauthorized(&self, epoch: u64) {
        let _refresh = self.refresh_lock.lock().await;

        if epoch != self.api.credential_epoch() {
            debug!(epoch, "Ignoring 401 from a replaced credential");
            return;
        }
        if self.identity().is_none() {
            return;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let already_refreshed = {
            let mut refreshed = self
                .refreshed_for
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let spent = *refreshed == Some(generation);
            *refreshed = Some(generation);
            spent
        };
        if already_refreshed {
            warn!("Credential rejected after refresh; signing out");
            self.sign_out().await;
            return;
        }

        match self.api.refresh_credential().await {
            Ok(credential) => {
                let _guard = self.write_lock.lock().await;
                if !self.is_current(generation) {
                    return;
                }
                if let Err(e) = save_json(&*self.storage, keys::AUTH_TOKEN, &credential).await {
                    warn!(error = %e, "Failed to persist refreshed credential");
                }
                self.set_credential(Some(credential));
                info!("Credential refreshed");
            }
            Err(e) => {
                if self.is_current(generation) {
                    warn!(error = %e, "Credential refresh failed; signing out");
                    self.sign_out().await;
                }
            }
        }
    }

    /// Spawn a task that feeds gateway 401s into `handle_unauthorized`.
    pub fn watch_gateway(
        self: Arc<Self>,
        mut events: broadcast::Receiver<GatewayEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(GatewayEvent::Unauthorized { epoch }) => {
                        self.handle_unauthorized(epoch).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed gateway events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
