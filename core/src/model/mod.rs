pub mod activity;
pub mod detection;
pub mod requests;
pub mod stats;

pub use activity::{ChangeEvent, ChangeKind, Note, TimelineEntry};
pub use detection::{Coordinates, Detection, Method, NewDetection, SensorDetails, Status};
pub use requests::{AssignmentRequest, NoteRequest, StatusUpdate};
pub use stats::{MethodCounts, Stats, StatsBreakdown, StatusCounts};
