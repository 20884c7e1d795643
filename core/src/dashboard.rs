//! One operator session: a shared store plus the session-local filter and
//! highlight state, rendered into frames on demand.

use crate::config::DashboardConfig;
use crate::filter::{FilterEngine, FilterOptions};
use crate::model::{Detection, Note, Stats, Status};
use crate::prelude::{CoreResult, DetectionSource, MutationApi};
use crate::store::DetectionStore;
use crate::views::{recent, HighlightKey, Highlighter};
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the presentation layer needs for one render.
#[derive(Debug, Clone, Default)]
pub struct DashboardFrame {
    pub filtered: Vec<Detection>,
    pub recent: Vec<Detection>,
    pub stats: Stats,
    pub highlighted: BTreeSet<HighlightKey>,
    pub options: FilterOptions,
    pub last_update: Option<DateTime<Utc>>,
    pub stale: bool,
    pub total: usize,
    pub version: u64,
}

impl DashboardFrame {
    pub fn is_highlighted(&self, key: HighlightKey) -> bool {
        self.highlighted.contains(&key)
    }
}

#[derive(Debug)]
pub struct DashboardSession<S> {
    store: Arc<DetectionStore<S>>,
    filters: FilterEngine,
    highlighter: Highlighter,
    recent_count: usize,
    stale_after: Duration,
    seen_version: Option<u64>,
}

impl<S> DashboardSession<S> {
    pub fn new(store: Arc<DetectionStore<S>>, config: &DashboardConfig) -> Self {
        Self {
            store,
            filters: FilterEngine::new(),
            highlighter: Highlighter::new(config.highlight_delay()),
            recent_count: config.recent_count,
            stale_after: config.stale_after(),
            seen_version: None,
        }
    }

    pub fn store(&self) -> &Arc<DetectionStore<S>> {
        &self.store
    }

    pub fn filters(&self) -> &FilterEngine {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterEngine {
        &mut self.filters
    }

    /// Renders the current snapshot. Each snapshot version is shown to the
    /// highlighter once; an empty store never counts as a baseline.
    ///
    /// Versions committed between two calls are coalesced: the highlighter
    /// diffs what is on screen against the latest snapshot, so a value that
    /// changed and changed back in between is not highlighted.
    pub fn frame(&mut self, now: Instant, wall: DateTime<Utc>) -> DashboardFrame {
        let snapshot = self.store.snapshot();
        if snapshot.last_update.is_some() && self.seen_version != Some(snapshot.version) {
            self.highlighter.observe_snapshot(&snapshot, now);
            self.seen_version = Some(snapshot.version);
        } else {
            self.highlighter.expire(now);
        }

        DashboardFrame {
            filtered: self.filters.view(&snapshot).to_vec(),
            recent: recent(&snapshot.detections, self.recent_count).to_vec(),
            stats: snapshot.stats,
            highlighted: self.highlighter.highlighted(now),
            options: FilterOptions::from_detections(&snapshot.detections),
            last_update: snapshot.last_update,
            stale: snapshot.is_stale(wall, self.stale_after),
            total: snapshot.detections.len(),
            version: snapshot.version,
        }
    }

    pub fn dispose(&self) {
        self.store.dispose();
    }
}

/// Mutation commands issued by the presentation layer. The store is only
/// refreshed after the service accepts the change.
#[derive(Debug)]
pub struct Mutations<S, M> {
    store: Arc<DetectionStore<S>>,
    api: Arc<M>,
}

impl<S, M> Clone for Mutations<S, M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            api: Arc::clone(&self.api),
        }
    }
}

impl<S: DetectionSource, M: MutationApi> Mutations<S, M> {
    pub fn new(store: Arc<DetectionStore<S>>, api: Arc<M>) -> Self {
        Self { store, api }
    }

    pub async fn update_status(&self, id: &str, status: Status) -> CoreResult<Detection> {
        let updated = self.api.update_status(id, status).await.map_err(|err| {
            warn!("status update for {} rejected: {}", id, err);
            err
        })?;
        self.store.refresh().await;
        Ok(updated)
    }

    pub async fn add_note(&self, id: &str, content: &str) -> CoreResult<Note> {
        let note = self.api.add_note(id, content).await.map_err(|err| {
            warn!("note for {} rejected: {}", id, err);
            err
        })?;
        self.store.refresh().await;
        Ok(note)
    }

    pub async fn assign(&self, id: &str, user_id: &str) -> CoreResult<Detection> {
        let updated = self.api.assign(id, user_id).await.map_err(|err| {
            warn!("assignment of {} rejected: {}", id, err);
            err
        })?;
        self.store.refresh().await;
        Ok(updated)
    }
}
