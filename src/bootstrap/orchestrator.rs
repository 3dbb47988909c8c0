//! Bootstrap: keeps the current route in step with session and profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::decide::{Route, decide};
use crate::profile::ProfileResolver;
use crate::session::{Identity, SessionStore};

pub struct Bootstrap {
    session: Arc<SessionStore>,
    profile: Arc<ProfileResolver>,
    /// The user chose to continue past the current profile error.
    skipped: AtomicBool,
    last_user: Mutex<Option<String>>,
    route: watch::Sender<Route>,
}

impl Bootstrap {
    pub fn new(session: Arc<SessionStore>, profile: Arc<ProfileResolver>) -> Self {
        let (route, _rx) = watch::channel(Route::WaitLogin);
        Self {
            session,
            profile,
            skipped: AtomicBool::new(false),
            last_user: Mutex::new(None),
            route,
        }
    }

    pub fn route(&self) -> Route {
        self.route.borrow().clone()
    }

    pub fn routes(&self) -> watch::Receiver<Route> {
        self.route.subscribe()
    }

    /// Launch sequence: resolve the stored session, then its profile.
    pub async fn start(&self) -> Route {
        self.publish();
        self.session.initialize().await;
        self.sync().await
    }

    /// Push the session's identity to the profile resolver and wait for the
    /// profile to settle.
    pub async fn sync(&self) -> Route {
        let identity = self.session.identity();
        self.note_identity(identity.as_ref());
        self.publish();
        self.profile.identity_changed(identity).await;
        self.publish()
    }

    /// Load the profile again after an error.
    pub async fn retry(&self) -> Route {
        self.skipped.store(false, Ordering::SeqCst);
        if self.session.identity().is_none() {
            return self.publish();
        }
        info!("Retrying profile load");
        self.profile.load_profile().await;
        self.publish()
    }

    /// Continue to home despite a profile error. Anything other than
    /// `ShowError` is left as is.
    pub fn skip(&self) -> Route {
        if matches!(self.decided(), Route::ShowError(_)) {
            info!("Skipping profile error");
            self.skipped.store(true, Ordering::SeqCst);
        }
        self.publish()
    }

    /// Follow session and profile changes in the background until either
    /// store is dropped.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut session_rx = self.session.subscribe();
        let mut profile_rx = self.profile.subscribe();

        tokio::spawn(async move {
            self.follow_session();
            loop {
                tokio::select! {
                    changed = session_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        self.follow_session();
                    }
                    changed = profile_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        self.publish();
                    }
                }
            }
            debug!("Bootstrap watcher stopped");
        })
    }

    fn follow_session(&self) {
        let identity = self.session.identity();
        self.note_identity(identity.as_ref());
        if self.profile.set_identity(identity) {
            let profile = Arc::clone(&self.profile);
            tokio::spawn(async move {
                profile.load_profile().await;
            });
        }
        self.publish();
    }

    fn note_identity(&self, identity: Option<&Identity>) {
        let user = identity.map(|i| i.id.clone());
        let mut last = self.last_user.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != user {
            self.skipped.store(false, Ordering::SeqCst);
            *last = user;
        }
    }

    fn decided(&self) -> Route {
        decide(&self.session.state(), &self.profile.state())
    }

    fn publish(&self) -> Route {
        let mut next = self.decided();
        if matches!(next, Route::ShowError(_)) {
            if self.skipped.load(Ordering::SeqCst) {
                next = Route::GoHome;
            }
        } else {
            self.skipped.store(false, Ordering::SeqCst);
        }

        self.route.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!(from = %current, to = %next, "Route changed");
            *current = next.clone();
            true
        });
        next
    }
}
