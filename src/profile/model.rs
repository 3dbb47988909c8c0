//! Travel profile model and the merge rule applied on every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ways of travelling a user can pick during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    Hitchhiking,
    Cycling,
    Hiking,
    Vanlife,
    Motorbike,
    Sailing,
    PublicTransport,
    /// A mode this client does not know yet.
    #[serde(other)]
    Other,
}

impl std::fmt::Display for TravelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Hitchhiking => "hitchhiking",
            Self::Cycling => "cycling",
            Self::Hiking => "hiking",
            Self::Vanlife => "vanlife",
            Self::Motorbike => "motorbike",
            Self::Sailing => "sailing",
            Self::PublicTransport => "public_transport",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// One per identity.
///
/// `selected_modes` is an ordered set: duplicates are dropped on merge and
/// its first element is the fallback primary mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelProfile {
    pub user_id: String,
    #[serde(default)]
    pub selected_modes: Vec<TravelMode>,
    #[serde(default)]
    pub primary_mode: Option<TravelMode>,
    #[serde(default)]
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TravelProfile {
    /// A blank profile, created locally when the backend has none yet.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            selected_modes: Vec::new(),
            primary_mode: None,
            onboarding_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// `primary_mode ∈ selected_modes` whenever `selected_modes` is non-empty.
    pub fn is_consistent(&self) -> bool {
        self.selected_modes.is_empty()
            || self
                .primary_mode
                .is_some_and(|primary| self.selected_modes.contains(&primary))
    }

    /// Apply `patch` on top of this profile.
    pub fn merged(&self, patch: &ProfilePatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();

        let mut modes_changed = false;
        if let Some(modes) = &patch.selected_modes {
            let deduped = dedup(modes);
            modes_changed = deduped != next.selected_modes;
            next.selected_modes = deduped;
        }
        if let Some(primary) = patch.primary_mode {
            next.primary_mode = Some(primary);
        }
        if let Some(completed) = patch.onboarding_completed {
            next.onboarding_completed = completed;
        }

        next.enforce_primary(modes_changed);
        next.updated_at = now;
        next
    }

    fn enforce_primary(&mut self, modes_changed: bool) {
        match self.selected_modes.first() {
            Some(first) => {
                let still_selected = self
                    .primary_mode
                    .is_some_and(|primary| self.selected_modes.contains(&primary));
                if !still_selected {
                    self.primary_mode = Some(*first);
                }
            }
            None if modes_changed => self.primary_mode = None,
            None => {}
        }
    }
}

fn dedup(modes: &[TravelMode]) -> Vec<TravelMode> {
    let mut out: Vec<TravelMode> = Vec::with_capacity(modes.len());
    for mode in modes {
        if !out.contains(mode) {
            out.push(*mode);
        }
    }
    out
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_modes: Option<Vec<TravelMode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_mode: Option<TravelMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_completed: Option<bool>,
}

impl ProfilePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_modes(mut self, modes: impl IntoIterator<Item = TravelMode>) -> Self {
        self.selected_modes = Some(modes.into_iter().collect());
        self
    }

    pub fn primary_mode(mut self, mode: TravelMode) -> Self {
        self.primary_mode = Some(mode);
        self
    }

    pub fn onboarding_completed(mut self, completed: bool) -> Self {
        self.onboarding_completed = Some(completed);
        self
    }
}

/// Resolution state of the signed-in user's profile.
///
/// `Idle → Loading → {Ready, NeedsOnboarding, Error}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProfileState {
    #[default]
    Idle,
    Loading,
    Ready(TravelProfile),
    NeedsOnboarding,
    Error(String),
}

impl ProfileState {
    pub fn profile(&self) -> Option<&TravelProfile> {
        match self {
            Self::Ready(profile) => Some(profile),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProfileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Ready(profile) => write!(f, "ready({})", profile.user_id),
            Self::NeedsOnboarding => write!(f, "needs_onboarding"),
            Self::Error(reason) => write!(f, "error({reason})"),
        }
    }
}
