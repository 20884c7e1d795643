//! Standing filter specification and the filtered view derived from it.
//!
//! Dimensions combine with AND; the values inside `methods`, `locations` and
//! `statuses` combine with OR. An empty set places no constraint on its
//! dimension. Range inputs are not validated: a confidence range with
//! `min > max` simply matches nothing.

use crate::model::{Detection, Method, Status};
use crate::store::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inclusive bounds; either side may be unset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Inclusive bounds on the 0–100 confidence scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ConfidenceRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
        }
    }
}

impl ConfidenceRange {
    pub fn contains(&self, percent: f64) -> bool {
        percent >= self.min && percent <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FilterSpec {
    pub search: String,
    pub methods: BTreeSet<Method>,
    pub locations: BTreeSet<String>,
    pub statuses: BTreeSet<Status>,
    pub date_range: DateRange,
    pub confidence_range: ConfidenceRange,
}

impl FilterSpec {
    /// True when every dimension is at its all-pass default.
    pub fn is_default(&self) -> bool {
        *self == FilterSpec::default()
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        self.matches_search(detection)
            && (self.methods.is_empty() || self.methods.contains(&detection.method))
            && (self.locations.is_empty() || self.locations.contains(&detection.location))
            && (self.statuses.is_empty() || self.statuses.contains(&detection.status))
            && self.date_range.contains(detection.timestamp)
            && self
                .confidence_range
                .contains(detection.confidence_percent())
    }

    fn matches_search(&self, detection: &Detection) -> bool {
        if self.search.is_empty() {
            return true;
        }
        let needle = self.search.to_lowercase();
        detection.location.to_lowercase().contains(&needle)
            || detection.id.to_lowercase().contains(&needle)
    }
}

/// Returns the detections that satisfy `spec`, preserving input order.
pub fn apply_filters(all: &[Detection], spec: &FilterSpec) -> Vec<Detection> {
    if spec.is_default() {
        return all.to_vec();
    }
    all.iter()
        .filter(|detection| spec.matches(detection))
        .cloned()
        .collect()
}

/// Values the filter bar can offer, derived from the current list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptions {
    pub locations: Vec<String>,
}

impl FilterOptions {
    pub fn from_detections(all: &[Detection]) -> Self {
        let locations: BTreeSet<&str> = all.iter().map(|d| d.location.as_str()).collect();
        Self {
            locations: locations.into_iter().map(str::to_owned).collect(),
        }
    }
}

fn toggle<T: Ord>(set: &mut BTreeSet<T>, value: T) {
    if !set.remove(&value) {
        set.insert(value);
    }
}

/// Holds the standing spec and a cached view keyed by snapshot version.
///
/// The view is recomputed lazily whenever the spec is edited or a snapshot
/// with a different version is presented.
#[derive(Debug, Default)]
pub struct FilterEngine {
    spec: FilterSpec,
    cache: Option<CachedView>,
}

#[derive(Debug)]
struct CachedView {
    version: u64,
    detections: Vec<Detection>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn set_spec(&mut self, spec: FilterSpec) {
        if spec != self.spec {
            self.spec = spec;
            self.cache = None;
        }
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.edit(|spec| spec.search = search.into());
    }

    pub fn toggle_method(&mut self, method: Method) {
        self.edit(|spec| toggle(&mut spec.methods, method));
    }

    pub fn toggle_location(&mut self, location: &str) {
        self.edit(|spec| toggle(&mut spec.locations, location.to_owned()));
    }

    pub fn toggle_status(&mut self, status: Status) {
        self.edit(|spec| toggle(&mut spec.statuses, status));
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.edit(|spec| spec.date_range = range);
    }

    pub fn set_confidence_range(&mut self, range: ConfidenceRange) {
        self.edit(|spec| spec.confidence_range = range);
    }

    pub fn clear_filters(&mut self) {
        self.set_spec(FilterSpec::default());
    }

    /// Filtered view of `snapshot`, recomputed only when stale.
    pub fn view(&mut self, snapshot: &Snapshot) -> &[Detection] {
        let fresh = matches!(&self.cache, Some(cache) if cache.version == snapshot.version);
        if !fresh {
            self.cache = Some(CachedView {
                version: snapshot.version,
                detections: apply_filters(&snapshot.detections, &self.spec),
            });
        }
        match &self.cache {
            Some(cache) => &cache.detections,
            None => &[],
        }
    }

    fn edit(&mut self, apply: impl FnOnce(&mut FilterSpec)) {
        let mut spec = self.spec.clone();
        apply(&mut spec);
        self.set_spec(spec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinates;
    use chrono::TimeZone;

    fn detection(id: &str, location: &str, method: Method, status: Status, confidence: f64) -> Detection {
        Detection {
            id: id.into(),
            location: location.into(),
            method,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            status,
            coordinates: Coordinates::new(35.7, 51.4),
            confidence,
            details: None,
            assigned_to: None,
        }
    }

    fn sample() -> Vec<Detection> {
        vec![
            detection("a1", "Tehran-5", Method::PowerUsage, Status::Confirmed, 0.9),
            detection("a2", "Isfahan-2", Method::RfSignal, Status::Rejected, 0.5),
            detection("a3", "Tehran-5", Method::RfSignal, Status::Confirmed, 0.75),
            detection("a4", "Mashhad-1", Method::AcousticNoise, Status::UnderReview, 0.25),
            detection("a5", "Tabriz-3", Method::PowerUsage, Status::Rejected, 0.6),
        ]
    }

    fn ids(list: &[Detection]) -> Vec<&str> {
        list.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn default_spec_is_identity() {
        let all = sample();
        assert_eq!(apply_filters(&all, &FilterSpec::default()), all);
        assert!(apply_filters(&[], &FilterSpec::default()).is_empty());
    }

    #[test]
    fn methods_or_statuses_and() {
        let spec = FilterSpec {
            methods: [Method::PowerUsage, Method::RfSignal].into_iter().collect(),
            statuses: [Status::Confirmed].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(&sample(), &spec)), vec!["a1", "a3"]);
    }

    #[test]
    fn conjunction_equals_intersection_of_single_dimensions() {
        let all = sample();
        let methods: BTreeSet<Method> = [Method::RfSignal, Method::PowerUsage].into_iter().collect();
        let locations: BTreeSet<String> = ["Tehran-5".to_string(), "Tabriz-3".to_string()]
            .into_iter()
            .collect();
        let statuses: BTreeSet<Status> = [Status::Confirmed, Status::Rejected].into_iter().collect();

        let combined = apply_filters(
            &all,
            &FilterSpec {
                methods: methods.clone(),
                locations: locations.clone(),
                statuses: statuses.clone(),
                ..Default::default()
            },
        );
        let by_method = apply_filters(&all, &FilterSpec { methods, ..Default::default() });
        let by_location = apply_filters(&all, &FilterSpec { locations, ..Default::default() });
        let by_status = apply_filters(&all, &FilterSpec { statuses, ..Default::default() });

        let intersection: Vec<Detection> = all
            .iter()
            .filter(|d| by_method.contains(d) && by_location.contains(d) && by_status.contains(d))
            .cloned()
            .collect();
        assert_eq!(combined, intersection);
        assert_eq!(ids(&combined), vec!["a1", "a3", "a5"]);
    }

    #[test]
    fn search_is_case_insensitive_over_location_and_id() {
        let all = vec![detection("a1", "Tehran-5", Method::PowerUsage, Status::Confirmed, 0.5)];
        for needle in ["tehran", "TEHRAN-5", "A1"] {
            let spec = FilterSpec {
                search: needle.into(),
                ..Default::default()
            };
            assert_eq!(apply_filters(&all, &spec).len(), 1, "search {needle}");
        }
        let spec = FilterSpec {
            search: "xyz".into(),
            ..Default::default()
        };
        assert!(apply_filters(&all, &spec).is_empty());
    }

    #[test]
    fn confidence_range_is_inclusive_on_percent_scale() {
        let spec = FilterSpec {
            confidence_range: ConfidenceRange { min: 50.0, max: 75.0 },
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(&sample(), &spec)), vec!["a2", "a3", "a5"]);
    }

    #[test]
    fn inverted_confidence_range_matches_nothing() {
        let spec = FilterSpec {
            confidence_range: ConfidenceRange { min: 80.0, max: 20.0 },
            ..Default::default()
        };
        assert!(apply_filters(&sample(), &spec).is_empty());

        let pair = vec![
            detection("x", "A", Method::PowerUsage, Status::Confirmed, 0.5),
            detection("y", "B", Method::PowerUsage, Status::Confirmed, 0.9),
        ];
        assert!(apply_filters(&pair, &spec).is_empty());
    }

    #[test]
    fn date_range_bounds_are_optional_and_inclusive() {
        let mut all = sample();
        all[0].timestamp = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        all[1].timestamp = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        let from_only = FilterSpec {
            date_range: DateRange {
                from: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
                to: None,
            },
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(&all, &from_only)), vec!["a2", "a3", "a4", "a5"]);

        let to_only = FilterSpec {
            date_range: DateRange {
                from: None,
                to: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            },
            ..Default::default()
        };
        assert_eq!(ids(&apply_filters(&all, &to_only)), vec!["a1", "a3", "a4", "a5"]);
    }

    #[test]
    fn clear_filters_is_idempotent() {
        let mut engine = FilterEngine::new();
        engine.set_search("tehran");
        engine.toggle_method(Method::RfSignal);
        engine.clear_filters();
        let once = engine.spec().clone();
        engine.clear_filters();
        assert_eq!(engine.spec(), &once);
        assert!(engine.spec().is_default());
    }

    #[test]
    fn toggles_add_then_remove() {
        let mut engine = FilterEngine::new();
        engine.toggle_status(Status::Rejected);
        engine.toggle_location("Tehran-5");
        assert!(engine.spec().statuses.contains(&Status::Rejected));
        assert!(engine.spec().locations.contains("Tehran-5"));
        engine.toggle_status(Status::Rejected);
        engine.toggle_location("Tehran-5");
        assert!(engine.spec().is_default());
    }

    #[test]
    fn engine_recomputes_on_spec_or_version_change() {
        let mut engine = FilterEngine::new();
        let mut snapshot = Snapshot {
            detections: sample(),
            version: 1,
            ..Default::default()
        };
        assert_eq!(engine.view(&snapshot).len(), 5);

        engine.toggle_method(Method::AcousticNoise);
        assert_eq!(ids(engine.view(&snapshot)), vec!["a4"]);

        snapshot.detections.truncate(2);
        assert_eq!(ids(engine.view(&snapshot)), vec!["a4"], "same version stays cached");

        snapshot.version = 2;
        assert!(engine.view(&snapshot).is_empty());
    }

    #[test]
    fn options_list_distinct_sorted_locations() {
        let options = FilterOptions::from_detections(&sample());
        assert_eq!(
            options.locations,
            vec!["Isfahan-2", "Mashhad-1", "Tabriz-3", "Tehran-5"]
        );
    }
}
