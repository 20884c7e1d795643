use crate::repository::RepositoryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warp::http::StatusCode;

/// Limits and timings the routes need from the service config.
#[derive(Debug, Clone, Copy)]
pub struct ApiSettings {
    pub default_limit: usize,
    pub max_limit: usize,
    pub keep_alive: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl ApiSettings {
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub RepositoryError);

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }
}

pub fn reject(err: RepositoryError) -> warp::Rejection {
    warp::reject::custom(ApiError(err))
}
