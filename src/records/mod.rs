//! Record workflow: the row model, queue predicates, reviewer actions,
//! time windows and metrics.

pub mod action;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod time_range;

pub use action::{ActionKind, Mutation, ReviewAction, plan};
pub use metrics::{ChartSlice, Comparison, Metric, Metrics, QueueCount};
pub use model::{Permission, Record, RecordUpdate};
pub use queue::{Queue, queues_for};
pub use time_range::{Preset, TimeRange, WindowParams};
