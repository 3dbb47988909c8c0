//! Cache policy and the declarative mutation → invalidation map.

use std::time::Duration;

/// How a GET interacts with the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Always go to the network; never cache the result.
    #[default]
    Bypass,
    /// Serve from cache while fresh, populate on success.
    Ttl(Duration),
}

impl CachePolicy {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Bypass => None,
            Self::Ttl(ttl) => Some(*ttl),
        }
    }
}

/// Every state-changing call the client makes.
///
/// Each mutation names the cache-key fragments it makes stale; the gateway
/// drops them after the mutation succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    CreateSpot,
    UpdateSpot,
    DeleteSpot,
    /// Reviews change spot ratings as well as review listings.
    SubmitReview,
    CreateTrip,
    UpdateTrip,
    CreatePost,
    UpdateProfile,
}

impl Mutation {
    /// Cache-key fragments invalidated after this mutation succeeds.
    pub fn invalidates(&self) -> &'static [&'static str] {
        match self {
            Self::CreateSpot | Self::UpdateSpot | Self::DeleteSpot => &["/spots"],
            Self::SubmitReview => &["/spots", "/reviews"],
            Self::CreateTrip | Self::UpdateTrip => &["/trips", "/feed"],
            Self::CreatePost => &["/posts", "/feed"],
            Self::UpdateProfile => &["/profile"],
        }
    }
}
