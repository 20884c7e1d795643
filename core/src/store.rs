//! Canonical in-memory detection list and stats snapshot.
//!
//! Three independent triggers feed [`DetectionStore::refresh`]: the first tick
//! of the poll loop at startup, every change-feed event, and every poll
//! interval thereafter. Refreshes are neither cancelled nor serialized, so
//! overlapping fetches apply in the order they resolve.

use crate::config::{DashboardConfig, RefreshStrategy};
use crate::feed::{ChangeFeedClient, SubscriptionHandle};
use crate::model::{ChangeEvent, ChangeKind, Detection, Stats};
use crate::prelude::DetectionSource;
use crate::telemetry::{Counters, RefreshMetrics};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Consistent view of the list and the stats taken from one refresh.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub detections: Vec<Detection>,
    pub stats: Stats,
    pub last_update: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Snapshot {
    /// True when nothing has been loaded yet or the last load is older than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_update {
            None => true,
            Some(updated) => chrono::Duration::from_std(threshold)
                .map(|limit| now - updated > limit)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub poll_interval: Duration,
    pub strategy: RefreshStrategy,
    /// Cap applied to the list after patching a change in place.
    pub list_limit: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&DashboardConfig::default())
    }
}

impl StoreOptions {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            strategy: config.refresh_strategy,
            list_limit: Some(config.list_limit),
        }
    }
}

pub struct DetectionStore<S> {
    source: S,
    options: StoreOptions,
    snapshot: RwLock<Arc<Snapshot>>,
    versions: watch::Sender<u64>,
    metrics: RefreshMetrics,
    disposed: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<S> DetectionStore<S> {
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn get_all(&self) -> Vec<Detection> {
        self.snapshot().detections.clone()
    }

    pub fn get_stats(&self) -> Stats {
        self.snapshot().stats
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_update
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.snapshot().is_stale(now, threshold)
    }

    /// Receives the version of every snapshot applied from now on.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.versions.subscribe()
    }

    pub fn metrics(&self) -> Counters {
        self.metrics.snapshot()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stops the poll loop and the feed subscription. Fetches still in flight
    /// complete but their results are discarded.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(poller) = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take() {
            poller.abort();
        }
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            subscription.unsubscribe();
        }
        info!("detection store disposed");
    }

    /// Swaps in a new snapshot built from the current one. Returns false once disposed.
    /// The version is published while the write lock is held, so the watch
    /// channel never lags behind the snapshot.
    fn commit(&self, build: impl FnOnce(&Snapshot) -> (Vec<Detection>, Stats)) -> bool {
        {
            let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            if self.is_disposed() {
                debug!("discarding fetch result that resolved after dispose");
                return false;
            }
            let (detections, stats) = build(&guard);
            let version = guard.version + 1;
            *guard = Arc::new(Snapshot {
                detections,
                stats,
                last_update: Some(Utc::now()),
                version,
            });
            self.versions.send_replace(version);
        }
        self.metrics.record_refreshed();
        true
    }
}

impl<S: DetectionSource> DetectionStore<S> {
    /// Builds an idle store. Nothing is fetched until [`start`](Self::start)
    /// or an explicit [`refresh`](Self::refresh).
    pub fn create(source: S, options: StoreOptions) -> Arc<Self> {
        let (versions, _) = watch::channel(0);
        Arc::new(Self {
            source,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            versions,
            metrics: RefreshMetrics::new(),
            disposed: AtomicBool::new(false),
            poller: Mutex::new(None),
            subscription: Mutex::new(None),
        })
    }

    /// Spawns the poll loop on the current tokio runtime. Its first tick is
    /// immediate and serves as the startup refresh.
    pub fn start(self: &Arc<Self>) {
        if self.is_disposed() {
            warn!("start called on a disposed detection store");
            return;
        }
        let store = Arc::downgrade(self);
        let period = self.options.poll_interval.max(Duration::from_millis(1));
        let poller = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if store.is_disposed() {
                    break;
                }
                store.refresh().await;
            }
        });
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(poller);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("detection store polling every {:?}", period);
    }

    /// Subscribes to `feed`; every event is handled on its own task.
    pub fn attach_feed(self: &Arc<Self>, feed: &ChangeFeedClient) {
        let store = Arc::downgrade(self);
        let handle = feed.subscribe(move |event| {
            if let Some(store) = store.upgrade() {
                store.notify_change(event);
            }
        });
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.unsubscribe();
        }
    }

    /// Re-pulls list and stats together. Failures are logged and the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) {
        if self.is_disposed() {
            return;
        }
        let (detections, stats) =
            tokio::join!(self.source.fetch_detections(), self.source.fetch_stats());
        match (detections, stats) {
            (Ok(detections), Ok(stats)) => {
                let count = detections.len();
                if self.commit(move |_| (detections, stats)) {
                    debug!("refreshed {} detections", count);
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                self.metrics.record_failed();
                warn!("refresh failed, keeping previous snapshot: {}", err);
            }
        }
    }

    /// Handles one change-feed event on a new task so refreshes may overlap.
    pub fn notify_change(self: &Arc<Self>, event: ChangeEvent) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.handle_change(event).await;
        });
    }

    pub async fn handle_change(&self, event: ChangeEvent) {
        if self.is_disposed() {
            return;
        }
        self.metrics.record_feed_event();
        debug!("change feed {} {}", event.kind.as_str(), event.id);
        match self.options.strategy {
            RefreshStrategy::FullRefetch => self.refresh().await,
            RefreshStrategy::ApplyChange => self.apply_change(event).await,
        }
    }

    async fn apply_change(&self, event: ChangeEvent) {
        if event.kind != ChangeKind::Delete && event.record.is_none() {
            debug!("change {} carries no record, falling back to refresh", event.id);
            self.refresh().await;
            return;
        }
        let stats = match self.source.fetch_stats().await {
            Ok(stats) => stats,
            Err(err) => {
                self.metrics.record_failed();
                warn!("stats fetch failed, change {} not applied: {}", event.id, err);
                return;
            }
        };
        let limit = self.options.list_limit;
        self.commit(move |current| {
            let mut detections = current.detections.clone();
            patch_detections(&mut detections, &event);
            if let Some(limit) = limit {
                detections.truncate(limit);
            }
            (detections, stats)
        });
    }
}

impl<S> Drop for DetectionStore<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<S> fmt::Debug for DetectionStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("DetectionStore")
            .field("options", &self.options)
            .field("version", &snapshot.version)
            .field("detections", &snapshot.detections.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Applies one change to a newest-first list, keyed by id.
pub fn patch_detections(detections: &mut Vec<Detection>, event: &ChangeEvent) {
    detections.retain(|d| d.id != event.id);
    if event.kind == ChangeKind::Delete {
        return;
    }
    if let Some(record) = &event.record {
        let position = detections
            .iter()
            .position(|d| d.timestamp < record.timestamp)
            .unwrap_or(detections.len());
        detections.insert(position, record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, Method, Status};
    use crate::prelude::{CoreError, CoreResult};
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeState {
        detections: Mutex<Vec<Detection>>,
        stats: Mutex<Stats>,
        fail_list: AtomicBool,
        fail_stats: AtomicBool,
        list_calls: AtomicUsize,
        stats_calls: AtomicUsize,
        next_list_delay: Mutex<Option<Duration>>,
    }

    #[derive(Clone, Default)]
    struct FakeSource {
        state: Arc<FakeState>,
    }

    impl FakeSource {
        fn set(&self, detections: Vec<Detection>, total: u64) {
            *self.state.detections.lock().unwrap() = detections;
            self.state.stats.lock().unwrap().all_time.total = total;
        }

        fn list_calls(&self) -> usize {
            self.state.list_calls.load(Ordering::SeqCst)
        }

        fn stats_calls(&self) -> usize {
            self.state.stats_calls.load(Ordering::SeqCst)
        }
    }

    impl DetectionSource for FakeSource {
        async fn fetch_detections(&self) -> CoreResult<Vec<Detection>> {
            self.state.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_list.load(Ordering::SeqCst) {
                return Err(CoreError::Transport("connection refused".into()));
            }
            let detections = self.state.detections.lock().unwrap().clone();
            let delay = self.state.next_list_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                time::sleep(delay).await;
            }
            Ok(detections)
        }

        async fn fetch_stats(&self) -> CoreResult<Stats> {
            self.state.stats_calls.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_stats.load(Ordering::SeqCst) {
                return Err(CoreError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(*self.state.stats.lock().unwrap())
        }
    }

    fn detection(id: &str, hour: u32) -> Detection {
        Detection {
            id: id.into(),
            location: "Tehran-5".into(),
            method: Method::PowerUsage,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            status: Status::UnderReview,
            coordinates: Coordinates::new(35.7, 51.4),
            confidence: 0.5,
            details: None,
            assigned_to: None,
        }
    }

    fn ids(detections: &[Detection]) -> Vec<String> {
        detections.iter().map(|d| d.id.clone()).collect()
    }

    fn options(strategy: RefreshStrategy) -> StoreOptions {
        StoreOptions {
            poll_interval: Duration::from_secs(30),
            strategy,
            list_limit: Some(100),
        }
    }

    #[tokio::test]
    async fn refresh_replaces_list_and_stats() {
        let source = FakeSource::default();
        source.set(vec![detection("d2", 11), detection("d1", 10)], 2);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        assert!(store.last_update().is_none());

        store.refresh().await;

        let snapshot = store.snapshot();
        assert_eq!(ids(&snapshot.detections), vec!["d2", "d1"]);
        assert_eq!(store.get_stats().all_time.total, 2);
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.last_update.is_some());
        assert_eq!(store.metrics().refreshed, 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_values() {
        let source = FakeSource::default();
        source.set(vec![detection("d1", 10)], 1);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        store.refresh().await;
        let before_all = store.get_all();
        let before_stats = store.get_stats();
        let before_update = store.last_update();

        source.set(vec![detection("d2", 11), detection("d1", 10)], 2);
        source.state.fail_stats.store(true, Ordering::SeqCst);
        store.refresh().await;
        assert_eq!(store.get_all(), before_all);
        assert_eq!(store.get_stats(), before_stats);
        assert_eq!(store.last_update(), before_update);

        source.state.fail_stats.store(false, Ordering::SeqCst);
        source.state.fail_list.store(true, Ordering::SeqCst);
        store.refresh().await;
        assert_eq!(store.get_all(), before_all);
        assert_eq!(store.get_stats(), before_stats);
        assert_eq!(store.metrics().failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_refreshes_immediately_then_on_interval() {
        let source = FakeSource::default();
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        store.start();

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.list_calls(), 1);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.list_calls(), 2);

        store.dispose();
        time::sleep(Duration::from_secs(90)).await;
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_feed_event_triggers_a_full_refresh() {
        let source = FakeSource::default();
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));

        for _ in 0..3 {
            store.notify_change(ChangeEvent::insert(detection("d9", 9)));
        }
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(source.list_calls(), 3);
        assert_eq!(store.metrics().feed_events, 3);
        assert_eq!(store.snapshot().version, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_apply_in_resolution_order() {
        let source = FakeSource::default();
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        source.set(vec![detection("slow", 10)], 1);
        *source.state.next_list_delay.lock().unwrap() = Some(Duration::from_secs(5));
        let slow = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.refresh().await }
        });
        time::sleep(Duration::from_millis(10)).await;

        source.set(vec![detection("fast", 11)], 2);
        store.refresh().await;
        assert_eq!(ids(&store.get_all()), vec!["fast"]);
        assert_eq!(store.snapshot().version, 1);

        slow.await.unwrap();
        assert_eq!(ids(&store.get_all()), vec!["slow"]);
        assert_eq!(store.get_stats().all_time.total, 1);
        assert_eq!(store.snapshot().version, 2);
        assert_eq!(*store.subscribe().borrow(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_events_do_not_reset_the_poll_timer() {
        let source = FakeSource::default();
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        store.start();

        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(source.list_calls(), 1);

        store.notify_change(ChangeEvent::insert(detection("d9", 9)));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.list_calls(), 2);

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(source.list_calls(), 3);
        store.dispose();
    }

    #[tokio::test]
    async fn apply_change_patches_by_id_in_timestamp_order() {
        let source = FakeSource::default();
        source.set(vec![detection("d3", 12), detection("d1", 10)], 2);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::ApplyChange));
        store.refresh().await;

        store.handle_change(ChangeEvent::insert(detection("d2", 11))).await;
        assert_eq!(ids(&store.get_all()), vec!["d3", "d2", "d1"]);

        let mut confirmed = detection("d2", 11);
        confirmed.status = Status::Confirmed;
        store.handle_change(ChangeEvent::update(confirmed)).await;
        let all = store.get_all();
        assert_eq!(ids(&all), vec!["d3", "d2", "d1"]);
        assert_eq!(all[1].status, Status::Confirmed);

        store.handle_change(ChangeEvent::delete("d3")).await;
        assert_eq!(ids(&store.get_all()), vec!["d2", "d1"]);

        assert_eq!(source.list_calls(), 1);
        assert_eq!(source.stats_calls(), 4);
    }

    #[tokio::test]
    async fn apply_change_without_stats_leaves_list_unpatched() {
        let source = FakeSource::default();
        source.set(vec![detection("d1", 10)], 1);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::ApplyChange));
        store.refresh().await;

        source.state.fail_stats.store(true, Ordering::SeqCst);
        store.handle_change(ChangeEvent::insert(detection("d2", 11))).await;
        assert_eq!(ids(&store.get_all()), vec!["d1"]);
        assert_eq!(store.snapshot().version, 1);
    }

    #[tokio::test]
    async fn disposed_store_ignores_results() {
        let source = FakeSource::default();
        source.set(vec![detection("d1", 10)], 1);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        store.dispose();
        store.refresh().await;
        store.handle_change(ChangeEvent::delete("d1")).await;
        assert!(store.get_all().is_empty());
        assert_eq!(store.snapshot().version, 0);
        assert!(store.is_disposed());
    }

    #[tokio::test]
    async fn subscribers_see_new_versions() {
        let source = FakeSource::default();
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        let mut versions = store.subscribe();
        store.refresh().await;
        versions.changed().await.unwrap();
        assert_eq!(*versions.borrow_and_update(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn published_version_matches_snapshot_after_concurrent_commits() {
        let source = FakeSource::default();
        source.set(vec![detection("d1", 10)], 1);
        let store = DetectionStore::create(source.clone(), options(RefreshStrategy::FullRefetch));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.refresh().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.snapshot().version, 32);
        assert_eq!(*store.subscribe().borrow(), 32);
    }

    #[test]
    fn staleness_follows_last_update_age() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut snapshot = Snapshot::default();
        assert!(snapshot.is_stale(now, Duration::from_secs(90)));

        snapshot.last_update = Some(now - chrono::Duration::seconds(30));
        assert!(!snapshot.is_stale(now, Duration::from_secs(90)));

        snapshot.last_update = Some(now - chrono::Duration::seconds(120));
        assert!(snapshot.is_stale(now, Duration::from_secs(90)));
    }

    #[test]
    fn patch_inserts_after_equal_timestamps() {
        let mut list = vec![detection("a", 12), detection("b", 10)];
        patch_detections(&mut list, &ChangeEvent::insert(detection("c", 10)));
        assert_eq!(ids(&list), vec!["a", "b", "c"]);
        patch_detections(&mut list, &ChangeEvent::insert(detection("d", 23)));
        assert_eq!(ids(&list), vec!["d", "a", "b", "c"]);
    }
}
