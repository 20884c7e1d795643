pub mod stats;
pub mod store;

pub use store::{Repository, RepositoryError, SYSTEM_ACTOR};
