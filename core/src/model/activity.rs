use crate::model::detection::Detection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator annotation on a detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: u64,
    pub detection_id: String,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Audit line appended by the service for every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub detection_id: String,
    pub message: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Row-level notification pushed over the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Detection>,
}

impl ChangeEvent {
    pub fn insert(record: Detection) -> Self {
        Self {
            kind: ChangeKind::Insert,
            id: record.id.clone(),
            record: Some(record),
        }
    }

    pub fn update(record: Detection) -> Self {
        Self {
            kind: ChangeKind::Update,
            id: record.id.clone(),
            record: Some(record),
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            id: id.into(),
            record: None,
        }
    }
}
