//! Response caching: TTL store, request coalescing, and invalidation policy.

pub mod coalesce;
pub mod key;
pub mod policy;
pub mod response;

pub use coalesce::RequestCoalescer;
pub use key::CacheKey;
pub use policy::{CachePolicy, Mutation};
pub use response::ResponseCache;
