//! ProfileResolver: resolves the signed-in user's travel profile.
//!
//! Identity changes arrive through `identity_changed`. Each one bumps the
//! generation, and any load or save that started under an older generation
//! leaves the state alone when it completes. Loads and updates are
//! serialized with each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::ProfileApi;
use super::model::{ProfilePatch, ProfileState, TravelProfile};
use crate::error::ProfileError;
use crate::session::Identity;
use crate::storage::{DeviceStorage, keys, load_json, save_json};

pub struct ProfileResolver {
    api: Arc<dyn ProfileApi>,
    /// Local profile store used when the backend has no profile (dev only).
    fallback: Option<Arc<dyn DeviceStorage>>,
    state: watch::Sender<ProfileState>,
    identity: StdMutex<Option<Identity>>,
    generation: AtomicU64,
    op_lock: Mutex<()>,
}

impl ProfileResolver {
    pub fn new(api: Arc<dyn ProfileApi>) -> Self {
        let (state, _rx) = watch::channel(ProfileState::Idle);
        Self {
            api,
            fallback: None,
            state,
            identity: StdMutex::new(None),
            generation: AtomicU64::new(0),
            op_lock: Mutex::new(()),
        }
    }

    /// Serve and mirror profiles through device storage when the backend
    /// has none.
    pub fn with_dev_fallback(mut self, storage: Arc<dyn DeviceStorage>) -> Self {
        self.fallback = Some(storage);
        self
    }

    pub fn state(&self) -> ProfileState {
        self.state.borrow().clone()
    }

    pub fn profile(&self) -> Option<TravelProfile> {
        self.state.borrow().profile().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }

    fn user_id(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|identity| identity.id.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, next: ProfileState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            info!(from = %previous, to = %next, "Profile transition");
        }
    }

    /// Apply `next` only if no identity change happened since `generation`
    /// was read. The check runs under the channel's write lock, which
    /// `clear` also takes after bumping the generation.
    fn transition_if_current(&self, generation: u64, next: ProfileState) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            applied = true;
            if *state == next {
                return false;
            }
            info!(from = %state, to = %next, "Profile transition");
            *state = next;
            true
        });
        applied
    }

    /// The session's identity changed. `None` resets; a different user
    /// starts a fresh load. The same user again is a no-op unless nothing
    /// has been loaded yet.
    pub async fn identity_changed(&self, identity: Option<Identity>) {
        if self.set_identity(identity) {
            self.load_profile().await;
        }
    }

    /// Record the identity without loading. Returns `true` when the caller
    /// should follow up with `load_profile`.
    pub fn set_identity(&self, identity: Option<Identity>) -> bool {
        let Some(identity) = identity else {
            if self.user_id().is_some() || *self.state.borrow() != ProfileState::Idle {
                self.clear();
            }
            return false;
        };

        let mut current = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
        let same_user = current.as_ref().is_some_and(|c| c.id == identity.id);
        if same_user && *self.state.borrow() != ProfileState::Idle {
            return false;
        }

        debug!(user_id = %identity.id, "Profile identity changed");
        *current = Some(identity);
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(current);
        self.transition(ProfileState::Idle);
        true
    }

    /// Drop everything about the current user and return to `Idle`.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.transition(ProfileState::Idle);
    }

    /// Fetch the profile for the current identity.
    ///
    /// `NotFound` means the user has not onboarded yet; any other failure
    /// lands in `Error` and can be retried by calling this again.
    pub async fn load_profile(&self) -> ProfileState {
        let _op = self.op_lock.lock().await;

        let generation = self.generation.load(Ordering::SeqCst);
        let Some(user_id) = self.user_id() else {
            warn!("Profile load requested without an identity");
            return self.state();
        };
        if !self.transition_if_current(generation, ProfileState::Loading) {
            return self.state();
        }

        let next = match self.api.fetch_profile(&user_id).await {
            Ok(profile) => ProfileState::Ready(profile),
            Err(e) if e.is_not_found() => match self.local_profile(&user_id).await {
                Some(profile) => {
                    info!(user_id = %user_id, "Serving locally stored profile");
                    ProfileState::Ready(profile)
                }
                None => ProfileState::NeedsOnboarding,
            },
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Profile load failed");
                ProfileState::Error(e.message)
            }
        };

        if !self.transition_if_current(generation, next) {
            debug!(user_id = %user_id, "Identity changed during profile load; discarding");
        }
        self.state()
    }

    /// Merge `patch` into the profile.
    ///
    /// The merged profile is visible immediately. If the backend rejects it
    /// the state is restored to exactly what it was before the merge and
    /// the failure is returned.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<TravelProfile, ProfileError> {
        let _op = self.op_lock.lock().await;

        let generation = self.generation.load(Ordering::SeqCst);
        let user_id = self.user_id().ok_or(ProfileError::NoIdentity)?;
        let now = Utc::now();

        let snapshot = self.state();
        let base = match &snapshot {
            ProfileState::Ready(profile) => profile.clone(),
            ProfileState::NeedsOnboarding => TravelProfile::new(user_id.as_str(), now),
            _ => return Err(ProfileError::NotLoaded),
        };
        let optimistic = base.merged(&patch, now);
        debug_assert!(optimistic.is_consistent());
        if !self.transition_if_current(generation, ProfileState::Ready(optimistic.clone())) {
            return Err(ProfileError::NoIdentity);
        }

        let saved = match self.api.save_profile(&optimistic).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() && self.fallback.is_some() => {
                debug!(user_id = %user_id, "No backend profile; saving locally only");
                Ok(())
            }
            Err(e) => Err(e),
        };

        match saved {
            Ok(()) => {
                if self.is_current(generation) {
                    self.mirror_locally(&optimistic).await;
                }
                Ok(optimistic)
            }
            Err(e) => {
                if self.transition_if_current(generation, snapshot) {
                    warn!(user_id = %user_id, error = %e, "Profile update rejected; rolled back");
                } else {
                    debug!(user_id = %user_id, "Identity changed during profile update; leaving state");
                }
                Err(e.into())
            }
        }
    }

    async fn local_profile(&self, user_id: &str) -> Option<TravelProfile> {
        let storage = self.fallback.as_ref()?;
        match load_json::<TravelProfile>(&**storage, keys::TRAVEL_PROFILE).await {
            Ok(profile) => profile.filter(|p| p.user_id == user_id),
            Err(e) => {
                warn!(error = %e, "Stored profile unreadable");
                None
            }
        }
    }

    async fn mirror_locally(&self, profile: &TravelProfile) {
        if let Some(storage) = &self.fallback {
            if let Err(e) = save_json(&**storage, keys::TRAVEL_PROFILE, profile).await {
                warn!(error = %e, "Failed to store profile locally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{ApiError, ApiErrorKind};
    use crate::profile::TravelMode;
    use crate::storage::MemoryStorage;

    struct FakeProfiles {
        fetch: StdMutex<Result<TravelProfile, ApiError>>,
        save: StdMutex<Result<(), ApiError>>,
        saved: StdMutex<Vec<TravelProfile>>,
        fetch_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeProfiles {
        fn new(fetch: Result<TravelProfile, ApiError>) -> Self {
            Self {
                fetch: StdMutex::new(fetch),
                save: StdMutex::new(Ok(())),
                saved: StdMutex::new(Vec::new()),
                fetch_calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl ProfileApi for FakeProfiles {
        async fn fetch_profile(&self, _user_id: &str) -> Result<TravelProfile, ApiError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.fetch.lock().unwrap().clone()
        }

        async fn save_profile(&self, profile: &TravelProfile) -> Result<TravelProfile, ApiError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.save.lock().unwrap().clone()?;
            self.saved.lock().unwrap().push(profile.clone());
            Ok(profile.clone())
        }
    }

    fn identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            display_name: None,
            email_verified: true,
            phone_verified: false,
        }
    }

    fn profile(modes: &[TravelMode], completed: bool) -> TravelProfile {
        let mut p = TravelProfile::new("u1", Utc::now());
        p.selected_modes = modes.to_vec();
        p.primary_mode = modes.first().copied();
        p.onboarding_completed = completed;
        p
    }

    fn not_found() -> ApiError {
        ApiError::new(ApiErrorKind::NotFound, "Profile not found")
    }

    #[tokio::test]
    async fn found_profile_is_ready() {
        let stored = profile(&[TravelMode::Cycling], true);
        let resolver = ProfileResolver::new(Arc::new(FakeProfiles::new(Ok(stored.clone()))));

        resolver.identity_changed(Some(identity("u1"))).await;
        assert_eq!(resolver.state(), ProfileState::Ready(stored));
    }

    #[tokio::test]
    async fn not_found_needs_onboarding() {
        let resolver = ProfileResolver::new(Arc::new(FakeProfiles::new(Err(not_found()))));

        resolver.identity_changed(Some(identity("u1"))).await;
        assert_eq!(resolver.state(), ProfileState::NeedsOnboarding);
    }

    #[tokio::test]
    async fn other_errors_are_retryable() {
        let api = Arc::new(FakeProfiles::new(Err(ApiError::new(
            ApiErrorKind::ServerError,
            "upstream down",
        ))));
        let resolver = ProfileResolver::new(api.clone());

        resolver.identity_changed(Some(identity("u1"))).await;
        assert_eq!(resolver.state(), ProfileState::Error("upstream down".into()));

        *api.fetch.lock().unwrap() = Ok(profile(&[TravelMode::Hiking], true));
        resolver.load_profile().await;
        assert!(matches!(resolver.state(), ProfileState::Ready(_)));
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_without_identity_stays_idle() {
        let api = Arc::new(FakeProfiles::new(Err(not_found())));
        let resolver = ProfileResolver::new(api.clone());

        assert_eq!(resolver.load_profile().await, ProfileState::Idle);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_identity_does_not_reload() {
        let api = Arc::new(FakeProfiles::new(Ok(profile(&[], false))));
        let resolver = ProfileResolver::new(api.clone());

        resolver.identity_changed(Some(identity("u1"))).await;
        resolver.identity_changed(Some(identity("u1"))).await;
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_returns_to_idle() {
        let resolver =
            ProfileResolver::new(Arc::new(FakeProfiles::new(Ok(profile(&[], true)))));
        resolver.identity_changed(Some(identity("u1"))).await;

        resolver.identity_changed(None).await;
        assert_eq!(resolver.state(), ProfileState::Idle);
        assert!(matches!(
            resolver.update_profile(ProfilePatch::new()).await,
            Err(ProfileError::NoIdentity)
        ));
    }

    #[tokio::test]
    async fn sign_out_during_load_discards_result() {
        let gate = Arc::new(Notify::new());
        let api = FakeProfiles::new(Ok(profile(&[], true))).gated(gate.clone());
        let resolver = Arc::new(ProfileResolver::new(Arc::new(api)));

        let loading = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.identity_changed(Some(identity("u1"))).await })
        };
        while resolver.state() != ProfileState::Loading {
            tokio::task::yield_now().await;
        }

        resolver.clear();
        gate.notify_one();
        loading.await.unwrap();

        assert_eq!(resolver.state(), ProfileState::Idle);
    }

    #[tokio::test]
    async fn completion_after_clear_is_not_applied() {
        let resolver =
            ProfileResolver::new(Arc::new(FakeProfiles::new(Ok(profile(&[], true)))));
        resolver.identity_changed(Some(identity("u1"))).await;
        let generation = resolver.generation.load(Ordering::SeqCst);

        resolver.clear();
        let applied = resolver
            .transition_if_current(generation, ProfileState::Ready(profile(&[], true)));

        assert!(!applied);
        assert_eq!(resolver.state(), ProfileState::Idle);
    }

    #[tokio::test]
    async fn update_replaces_deselected_primary_mode() {
        let resolver = ProfileResolver::new(Arc::new(FakeProfiles::new(Ok(profile(
            &[TravelMode::Hitchhiking],
            true,
        )))));
        resolver.identity_changed(Some(identity("u1"))).await;

        let updated = resolver
            .update_profile(ProfilePatch::new().selected_modes([TravelMode::Cycling]))
            .await
            .unwrap();
        assert_eq!(updated.primary_mode, Some(TravelMode::Cycling));
        assert_eq!(resolver.profile().unwrap().primary_mode, Some(TravelMode::Cycling));
    }

    #[tokio::test]
    async fn update_is_visible_before_save_completes() {
        let gate = Arc::new(Notify::new());
        let api = FakeProfiles::new(Ok(profile(&[TravelMode::Hiking], true)));
        let resolver = Arc::new(ProfileResolver::new(Arc::new(api.gated(gate.clone()))));

        gate.notify_one();
        resolver.identity_changed(Some(identity("u1"))).await;

        let update = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .update_profile(ProfilePatch::new().selected_modes([TravelMode::Sailing]))
                    .await
            })
        };
        while resolver.profile().map(|p| p.selected_modes) != Some(vec![TravelMode::Sailing]) {
            tokio::task::yield_now().await;
        }

        gate.notify_one();
        assert!(update.await.unwrap().is_ok());
        assert_eq!(resolver.profile().unwrap().primary_mode, Some(TravelMode::Sailing));
    }

    #[tokio::test]
    async fn failed_update_restores_snapshot() {
        let original = profile(&[TravelMode::Hitchhiking], true);
        let api = Arc::new(FakeProfiles::new(Ok(original.clone())));
        *api.save.lock().unwrap() = Err(ApiError::new(ApiErrorKind::ServerError, "db down"));
        let resolver = ProfileResolver::new(api.clone());
        resolver.identity_changed(Some(identity("u1"))).await;

        let err = resolver
            .update_profile(ProfilePatch::new().selected_modes([TravelMode::Cycling]))
            .await
            .unwrap_err();

        assert!(matches!(err, ProfileError::Api(ref e) if e.kind == ApiErrorKind::ServerError));
        assert_eq!(resolver.state(), ProfileState::Ready(original));
    }

    #[tokio::test]
    async fn failed_first_save_returns_to_onboarding() {
        let api = Arc::new(FakeProfiles::new(Err(not_found())));
        *api.save.lock().unwrap() = Err(ApiError::network("offline"));
        let resolver = ProfileResolver::new(api.clone());
        resolver.identity_changed(Some(identity("u1"))).await;

        assert!(
            resolver
                .update_profile(ProfilePatch::new().onboarding_completed(true))
                .await
                .is_err()
        );
        assert_eq!(resolver.state(), ProfileState::NeedsOnboarding);
    }

    #[tokio::test]
    async fn onboarding_creates_profile() {
        let api = Arc::new(FakeProfiles::new(Err(not_found())));
        let resolver = ProfileResolver::new(api.clone());
        resolver.identity_changed(Some(identity("u1"))).await;

        let created = resolver
            .update_profile(
                ProfilePatch::new()
                    .selected_modes([TravelMode::Hitchhiking])
                    .onboarding_completed(true),
            )
            .await
            .unwrap();

        assert_eq!(created.user_id, "u1");
        assert_eq!(created.primary_mode, Some(TravelMode::Hitchhiking));
        assert!(created.onboarding_completed);
        assert_eq!(api.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_before_load_is_rejected() {
        let resolver = ProfileResolver::new(Arc::new(FakeProfiles::new(Err(not_found()))));
        *resolver.identity.lock().unwrap() = Some(identity("u1"));

        assert!(matches!(
            resolver.update_profile(ProfilePatch::new()).await,
            Err(ProfileError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn dev_fallback_serves_and_mirrors_local_profile() {
        let storage = Arc::new(MemoryStorage::new());
        let api = Arc::new(FakeProfiles::new(Err(not_found())));
        *api.save.lock().unwrap() = Err(not_found());
        let resolver = ProfileResolver::new(api.clone()).with_dev_fallback(storage.clone());
        resolver.identity_changed(Some(identity("u1"))).await;
        assert_eq!(resolver.state(), ProfileState::NeedsOnboarding);

        resolver
            .update_profile(
                ProfilePatch::new()
                    .selected_modes([TravelMode::Vanlife])
                    .onboarding_completed(true),
            )
            .await
            .unwrap();

        // A fresh resolver picks the local copy up on load.
        let reloaded = ProfileResolver::new(api).with_dev_fallback(storage);
        reloaded.identity_changed(Some(identity("u1"))).await;
        let profile = reloaded.profile().unwrap();
        assert_eq!(profile.selected_modes, vec![TravelMode::Vanlife]);
        assert!(profile.onboarding_completed);
    }

    #[tokio::test]
    async fn dev_fallback_ignores_other_users_profile() {
        let storage = Arc::new(MemoryStorage::new());
        save_json(&*storage, keys::TRAVEL_PROFILE, &profile(&[TravelMode::Hiking], true))
            .await
            .unwrap();
        let resolver = ProfileResolver::new(Arc::new(FakeProfiles::new(Err(not_found()))))
            .with_dev_fallback(storage);

        resolver.identity_changed(Some(identity("u2"))).await;
        assert_eq!(resolver.state(), ProfileState::NeedsOnboarding);
    }
}
