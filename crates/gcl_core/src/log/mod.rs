//! The on-disk log: header, store and subscriptions.

mod header;
mod store;
mod subscription;

pub use header::{LogHeader, LOG_FORMAT_VERSION, LOG_HEADER_SIZE, LOG_MAGIC, LOG_TYPE_DEFAULT};
pub use store::LogStore;
pub use subscription::{Subscription, SubscriptionEvent};
