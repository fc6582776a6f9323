//! Run Monitoring
//!
//! - [`ExecutionTimeline`]: per-step start/end timing and a text chart

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, StepTiming, TimelineEvent};
