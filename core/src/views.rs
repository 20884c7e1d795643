//! Views derived from the full snapshot: the recent slice and the transient
//! highlight overlay for counters that just changed.

use crate::model::{Detection, Method, Stats, StatsBreakdown, Status};
use crate::store::Snapshot;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

pub const DEFAULT_RECENT_COUNT: usize = 4;
pub const DEFAULT_HIGHLIGHT_DELAY: Duration = Duration::from_millis(2500);

/// First `count` entries of the server-ordered list. No re-sorting.
pub fn recent(all: &[Detection], count: usize) -> &[Detection] {
    &all[..count.min(all.len())]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    AllTime,
    Last7Days,
}

/// UI key of a value that can be highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HighlightKey {
    Total(Window),
    Method(Window, Method),
    Status(Window, Status),
    NewestDetection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedValue {
    Count(u64),
    Id(Option<String>),
}

/// Every value the highlighter diffs between snapshots.
pub fn tracked_values(detections: &[Detection], stats: &Stats) -> BTreeMap<HighlightKey, TrackedValue> {
    let mut values = BTreeMap::new();
    track_breakdown(&mut values, Window::AllTime, &stats.all_time);
    track_breakdown(&mut values, Window::Last7Days, &stats.last_7_days);
    values.insert(
        HighlightKey::NewestDetection,
        TrackedValue::Id(detections.first().map(|d| d.id.clone())),
    );
    values
}

fn track_breakdown(
    values: &mut BTreeMap<HighlightKey, TrackedValue>,
    window: Window,
    breakdown: &StatsBreakdown,
) {
    values.insert(HighlightKey::Total(window), TrackedValue::Count(breakdown.total));
    for method in Method::ALL {
        values.insert(
            HighlightKey::Method(window, method),
            TrackedValue::Count(breakdown.methods.get(method)),
        );
    }
    for status in Status::ALL {
        values.insert(
            HighlightKey::Status(window, status),
            TrackedValue::Count(breakdown.statuses.get(status)),
        );
    }
}

/// Self-expiring set of recently changed keys.
///
/// The whole set shares one deadline. A change while keys are still
/// highlighted adds its keys and pushes the deadline out by a full delay.
#[derive(Debug)]
pub struct Highlighter {
    delay: Duration,
    previous: Option<BTreeMap<HighlightKey, TrackedValue>>,
    highlighted: BTreeSet<HighlightKey>,
    expires_at: Option<Instant>,
}

impl Highlighter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            previous: None,
            highlighted: BTreeSet::new(),
            expires_at: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Diffs `values` against the previous observation. The first call only
    /// records a baseline.
    pub fn observe(&mut self, values: BTreeMap<HighlightKey, TrackedValue>, now: Instant) {
        self.expire(now);
        if let Some(previous) = &self.previous {
            let changed: Vec<HighlightKey> = values
                .iter()
                .filter(|(key, value)| previous.get(key) != Some(value))
                .map(|(key, _)| *key)
                .collect();
            if !changed.is_empty() {
                self.highlighted.extend(changed);
                self.expires_at = Some(now + self.delay);
            }
        }
        self.previous = Some(values);
    }

    pub fn observe_snapshot(&mut self, snapshot: &Snapshot, now: Instant) {
        self.observe(tracked_values(&snapshot.detections, &snapshot.stats), now);
    }

    pub fn is_highlighted(&self, key: HighlightKey, now: Instant) -> bool {
        self.is_live(now) && self.highlighted.contains(&key)
    }

    pub fn highlighted(&self, now: Instant) -> BTreeSet<HighlightKey> {
        if self.is_live(now) {
            self.highlighted.clone()
        } else {
            BTreeSet::new()
        }
    }

    /// Drops the set once its deadline has passed.
    pub fn expire(&mut self, now: Instant) {
        if !self.is_live(now) {
            self.highlighted.clear();
            self.expires_at = None;
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now < deadline)
    }
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new(DEFAULT_HIGHLIGHT_DELAY)
    }
}
