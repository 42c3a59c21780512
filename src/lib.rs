pub mod cli;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod reconcile;
pub mod store;

pub use dataset::{Dataset, MatchedDataset};
pub use error::{ConfigError, LinkError, LinkResult};
pub use models::{ClusterId, Value};
pub use store::LinkStore;
