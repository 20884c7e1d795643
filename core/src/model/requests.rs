use crate::model::detection::Status;
use serde::{Deserialize, Serialize};

/// Body of `PUT /detections/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Body of `POST /detections/{id}/notes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Body of `POST /detections/{id}/assignment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}
