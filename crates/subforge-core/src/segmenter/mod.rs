//! Segment planning.
//!
//! Turns the speech map from the front end into the list of spans sent to
//! the backend: bounded length, ordered, non-overlapping.

mod plan;

pub use plan::{empty_retry_window, plan_segments, SegmentPlan, SegmentPlanParams};
