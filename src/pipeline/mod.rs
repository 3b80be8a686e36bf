// src/pipeline/mod.rs
//
// Runtime plumbing around the analysis stages.
//
// Data flow:
//   FrameSource → CaptureWorker → FrameBuffer → PipelineDriver
//   PipelineDriver → EventBus → ReportHandle (snapshots, subscribers) + EventLog

pub mod driver;
pub mod event_bus;
pub mod event_log;
pub mod frame_buffer;
pub mod frame_context;
pub mod metrics;

pub use driver::{PipelineDriver, RunSummary, StopReason};
pub use event_bus::{EventBus, PipelineEvent, ReportHandle};
pub use event_log::EventLog;
pub use frame_buffer::{BufferPoll, CaptureWorker, FrameBuffer};
pub use frame_context::{FrameContext, FrameOutcome, FrameStatus};
pub use metrics::{MetricsSummary, PipelineMetrics};
