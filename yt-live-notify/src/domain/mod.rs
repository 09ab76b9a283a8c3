//! Domain types shared by the provider, monitor and notification layers.

pub mod filter;
pub mod retry_policy;
pub mod subscription;
pub mod video;

pub use filter::{KeywordFilter, filter_by_keywords};
pub use retry_policy::RetryPolicy;
pub use subscription::ChannelSubscription;
pub use video::{Lifecycle, VideoRecord};
