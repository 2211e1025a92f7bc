pub mod config;
pub mod feed;
pub mod store;

pub use config::{Config, ConfigError};
pub use feed::{Feed, FeedError, ImportSummary};
pub use store::{Store, StoreError};
