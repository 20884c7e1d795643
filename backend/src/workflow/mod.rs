pub mod config;
pub mod runner;

pub use config::BackendConfig;
pub use runner::Runner;
