use crate::model::{Detection, Note, Stats, Status};
use std::future::Future;

/// Common error type for backend round trips and configuration.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoreError::Decode(err.to_string())
        } else {
            CoreError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}

/// Read side of the detection service: the list and the stats singleton.
pub trait DetectionSource: Send + Sync + 'static {
    /// Detections sorted by timestamp, newest first.
    fn fetch_detections(&self) -> impl Future<Output = CoreResult<Vec<Detection>>> + Send;
    fn fetch_stats(&self) -> impl Future<Output = CoreResult<Stats>> + Send;
}

/// Operator mutations. Each call also appends a timeline entry on the service.
pub trait MutationApi: Send + Sync + 'static {
    fn update_status(
        &self,
        id: &str,
        status: Status,
    ) -> impl Future<Output = CoreResult<Detection>> + Send;
    fn add_note(&self, id: &str, content: &str) -> impl Future<Output = CoreResult<Note>> + Send;
    fn assign(&self, id: &str, user_id: &str) -> impl Future<Output = CoreResult<Detection>> + Send;
}
