use chrono::{DateTime, Duration, Utc};
use minewatchcore::model::{Detection, Stats};

pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Counts every detection once for all time and again when its timestamp
/// falls in `[now - 7 days, now]`.
pub fn aggregate<'a, I>(detections: I, now: DateTime<Utc>) -> Stats
where
    I: IntoIterator<Item = &'a Detection>,
{
    let window_start = now - Duration::days(RECENT_WINDOW_DAYS);
    let mut stats = Stats::default();
    for detection in detections {
        stats.all_time.record(detection.method, detection.status);
        if detection.timestamp >= window_start && detection.timestamp <= now {
            stats.last_7_days.record(detection.method, detection.status);
        }
    }
    stats
}
