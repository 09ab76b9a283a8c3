//! Stream tracking: accumulated collections, transition detection and the
//! channel subscription registry.

mod state_store;
mod subscriptions;
mod transition;

pub use state_store::{StreamCollections, StreamStateStore};
pub use subscriptions::SubscriptionRegistry;
pub use transition::{DEFAULT_COMPLETION_WINDOW_HOURS, Detection, TransitionDetector};
