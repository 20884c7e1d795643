use crate::repository::stats::aggregate;
use chrono::{DateTime, Utc};
use log::{debug, info};
use minewatchcore::model::{
    ChangeEvent, Detection, NewDetection, Note, Stats, Status, TimelineEntry,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Actor recorded for entries the service writes on its own behalf.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("detection {0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Default)]
struct RepositoryState {
    next_detection: u64,
    next_note: u64,
    detections: HashMap<String, Detection>,
    notes: Vec<Note>,
    timeline: Vec<TimelineEntry>,
}

impl RepositoryState {
    fn detection_mut(&mut self, id: &str) -> RepositoryResult<&mut Detection> {
        self.detections
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    fn ensure_exists(&self, id: &str) -> RepositoryResult<()> {
        if self.detections.contains_key(id) {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(id.to_owned()))
        }
    }

    fn record(&mut self, detection_id: &str, message: String, actor: &str) {
        self.timeline.push(TimelineEntry {
            detection_id: detection_id.to_owned(),
            message,
            actor: actor.to_owned(),
            created_at: Utc::now(),
        });
    }
}

/// In-memory detection table. Every write is published on the change channel
/// after the lock is released.
#[derive(Debug)]
pub struct Repository {
    state: RwLock<RepositoryState>,
    changes: RwLock<Option<broadcast::Sender<ChangeEvent>>>,
}

impl Repository {
    pub fn new(change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            state: RwLock::new(RepositoryState::default()),
            changes: RwLock::new(Some(changes)),
        }
    }

    /// Receiver for every later change. Once the feed is closed the receiver
    /// is already terminated.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        match self.changes.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(changes) => changes.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, |changes| changes.receiver_count())
    }

    /// Ends every open feed stream. Writes still succeed but are no longer
    /// published.
    pub fn close_changes(&self) {
        let closed = self
            .changes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if closed.is_some() {
            info!("change feed closed");
        }
    }

    pub fn len(&self) -> usize {
        self.read().detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, new: NewDetection) -> RepositoryResult<Detection> {
        if new.location.trim().is_empty() {
            return Err(RepositoryError::InvalidInput("location must not be blank".into()));
        }
        if !(0.0..=1.0).contains(&new.confidence) {
            return Err(RepositoryError::InvalidInput(format!(
                "confidence {} outside [0, 1]",
                new.confidence
            )));
        }
        let detection = {
            let mut state = self.write();
            state.next_detection += 1;
            let id = format!("det-{:06}", state.next_detection);
            let detection = new.into_detection(id);
            state.record(
                &detection.id,
                format!("Detection recorded via {}", detection.method),
                SYSTEM_ACTOR,
            );
            state
                .detections
                .insert(detection.id.clone(), detection.clone());
            detection
        };
        self.publish(ChangeEvent::insert(detection.clone()));
        Ok(detection)
    }

    /// Newest first, ties broken by id so the order is stable.
    pub fn list(&self, limit: usize) -> Vec<Detection> {
        let state = self.read();
        let mut detections: Vec<Detection> = state.detections.values().cloned().collect();
        detections.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        detections.truncate(limit);
        detections
    }

    pub fn get(&self, id: &str) -> RepositoryResult<Detection> {
        self.read()
            .detections
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    pub fn update_status(&self, id: &str, status: Status, actor: &str) -> RepositoryResult<Detection> {
        let updated = {
            let mut state = self.write();
            let detection = state.detection_mut(id)?;
            let previous = detection.status;
            detection.status = status;
            let updated = detection.clone();
            state.record(
                id,
                format!("Status changed from {} to {}", previous, status),
                actor,
            );
            updated
        };
        self.publish(ChangeEvent::update(updated.clone()));
        Ok(updated)
    }

    pub fn add_note(&self, id: &str, content: &str, author: &str) -> RepositoryResult<Note> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RepositoryError::InvalidInput("note content must not be blank".into()));
        }
        let (note, detection) = {
            let mut state = self.write();
            let detection = state.detection_mut(id)?.clone();
            state.next_note += 1;
            let note = Note {
                id: state.next_note,
                detection_id: id.to_owned(),
                content: content.to_owned(),
                author: author.to_owned(),
                created_at: Utc::now(),
            };
            state.notes.push(note.clone());
            state.record(id, "Note added".into(), author);
            (note, detection)
        };
        self.publish(ChangeEvent::update(detection));
        Ok(note)
    }

    pub fn assign(&self, id: &str, user_id: &str, actor: &str) -> RepositoryResult<Detection> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(RepositoryError::InvalidInput("user id must not be blank".into()));
        }
        let updated = {
            let mut state = self.write();
            let detection = state.detection_mut(id)?;
            detection.assigned_to = Some(user_id.to_owned());
            let updated = detection.clone();
            state.record(id, format!("Assigned to {}", user_id), actor);
            updated
        };
        self.publish(ChangeEvent::update(updated.clone()));
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> RepositoryResult<Detection> {
        let removed = {
            let mut state = self.write();
            let removed = state
                .detections
                .remove(id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))?;
            state.notes.retain(|note| note.detection_id != id);
            state.timeline.retain(|entry| entry.detection_id != id);
            removed
        };
        self.publish(ChangeEvent::delete(id));
        Ok(removed)
    }

    pub fn notes(&self, id: &str) -> RepositoryResult<Vec<Note>> {
        let state = self.read();
        state.ensure_exists(id)?;
        Ok(state
            .notes
            .iter()
            .filter(|note| note.detection_id == id)
            .cloned()
            .collect())
    }

    /// Oldest entry first.
    pub fn timeline(&self, id: &str) -> RepositoryResult<Vec<TimelineEntry>> {
        let state = self.read();
        state.ensure_exists(id)?;
        Ok(state
            .timeline
            .iter()
            .filter(|entry| entry.detection_id == id)
            .cloned()
            .collect())
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Stats {
        aggregate(self.read().detections.values(), now)
    }

    fn publish(&self, event: ChangeEvent) {
        debug!("change {} {}", event.kind.as_str(), event.id);
        if let Some(changes) = self.changes.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            // No subscribers is not an error.
            let _ = changes.send(event);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RepositoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RepositoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
