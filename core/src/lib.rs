//! Client core for the Minewatch crypto-miner detection dashboard.
//!
//! The store keeps one consistent snapshot of the detection list and its
//! stats, refreshed on startup, on every change-feed event and on a poll
//! interval. Sessions layer client-side filtering and change highlighting on
//! top without ever writing back to the store.

pub mod config;
pub mod dashboard;
pub mod feed;
pub mod filter;
pub mod http;
pub mod model;
pub mod prelude;
pub mod store;
pub mod telemetry;
pub mod views;

pub use config::{DashboardConfig, RefreshStrategy};
pub use dashboard::{DashboardFrame, DashboardSession, Mutations};
pub use feed::{ChangeFeedClient, SubscriptionHandle};
pub use filter::{FilterEngine, FilterSpec};
pub use http::HttpBackend;
pub use prelude::{CoreError, CoreResult, DetectionSource, MutationApi};
pub use store::{DetectionStore, Snapshot, StoreOptions};
