// Pawz Presence: Analysis
//
// Everything between "a snapshot arrived" and "a proactive message went out".
//
// Module layout:
//   pipeline.rs        AnalysisPipeline, dispatcher (settle and filters)
//   decision_lane.rs   single-flight decision calls with fallback
//   reflection_lane.rs windowed reflections, memory writes
//   rounds.rs          round registry and the shared safety timer
//   actions.rs         deferred proactive actions
//   validation.rs      payload coercion for both lanes
//   events.rs          broadcast events and counters

pub mod actions;
pub mod decision_lane;
pub mod events;
pub mod pipeline;
pub mod reflection_lane;
pub mod rounds;
pub mod validation;

pub use events::{PipelineEvent, PipelineStatsSnapshot};
pub use pipeline::{AnalysisPipeline, PipelineServices};
