// src/lib.rs
//
// Directional people counting over a fixed camera.
//
//   source → detection → analysis (tracking, line crossing) → counting
//
// `pipeline::PipelineDriver` wires the stages together one frame at a time.

pub mod analysis;
pub mod config;
pub mod counting;
pub mod detection;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod types;

pub use config::Config;
pub use counting::{CountSnapshot, CountState};
pub use pipeline::{PipelineDriver, ReportHandle, RunSummary};
