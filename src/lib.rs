//! logbench - log agent benchmarking
//!
//! Generates timestamped log lines (or replays an existing log) into one or
//! more files at controlled rates, while sampling the CPU and memory used by
//! the log agent that tails those files.
//!
//! ```text
//!   ┌────────────┐  SetRate/Stop   ┌─────────────────┐    ┌──────────────────┐
//!   │   bench    │ ──────────────► │ RateScheduler / │ ─► │ RotatingWriter   │ ─► file
//!   │ (rate sweep│                 │ Replayer        │    │ (size/time)      │
//!   │  sampling) │                 └─────────────────┘    └──────────────────┘
//!   │            │  /proc samples  ┌─────────────────┐
//!   │            │ ◄────────────── │ Process tree    │ ◄── agent (optional child)
//!   └────────────┘                 └─────────────────┘
//! ```
//!
//! Timestamps follow Go-style reference-time layouts (`Jan _2 15:04:05.000`),
//! see [`layout`] and [`matcher`].

pub mod agent;
pub mod bench;
pub mod config;
pub mod error;
pub mod layout;
pub mod matcher;
pub mod pacing;
pub mod replay;
pub mod resource;
pub mod rotate;
pub mod scheduler;
pub mod source;
pub mod workload;

pub use bench::{Progress, RateReport, Sample};
pub use config::BenchConfig;
pub use error::{Error, Result};
pub use layout::TimeLayout;
pub use matcher::CompiledMatcher;
pub use replay::{ReplayConfig, Replayer};
pub use rotate::{RotateConfig, RotatingWriter};
pub use scheduler::RateScheduler;
pub use source::LineSource;
pub use workload::{Workload, Workloads};
