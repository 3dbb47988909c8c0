use crate::profile::ProfileState;
use crate::session::SessionState;

/// Where the app should be.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    /// Session not resolved yet.
    #[default]
    WaitLogin,
    GoLogin,
    /// Signed in, profile not resolved yet.
    WaitProfile,
    GoOnboarding,
    GoHome,
    /// Profile could not be loaded. The user can retry or skip to home.
    ShowError(String),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitLogin => write!(f, "wait_login"),
            Self::GoLogin => write!(f, "go_login"),
            Self::WaitProfile => write!(f, "wait_profile"),
            Self::GoOnboarding => write!(f, "go_onboarding"),
            Self::GoHome => write!(f, "go_home"),
            Self::ShowError(reason) => write!(f, "show_error({reason})"),
        }
    }
}

/// Join session and profile state into a single route. No side effects.
pub fn decide(session: &SessionState, profile: &ProfileState) -> Route {
    match (session, profile) {
        (SessionState::Unknown | SessionState::Authenticating, _) => Route::WaitLogin,
        (SessionState::Anonymous, _) => Route::GoLogin,
        (SessionState::Authenticated(_), ProfileState::Idle | ProfileState::Loading) => {
            Route::WaitProfile
        }
        (SessionState::Authenticated(_), ProfileState::NeedsOnboarding) => Route::GoOnboarding,
        (SessionState::Authenticated(_), ProfileState::Ready(profile)) => {
            if profile.onboarding_completed {
                Route::GoHome
            } else {
                Route::GoOnboarding
            }
        }
        (SessionState::Authenticated(_), ProfileState::Error(reason)) => {
            Route::ShowError(reason.clone())
        }
    }
}
