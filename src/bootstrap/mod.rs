//! Launch routing: joins session and profile state into one route.

pub mod decide;
pub mod orchestrator;

pub use decide::{Route, decide};
pub use orchestrator::Bootstrap;
