//! Workload handles
//!
//! A workload is a background worker that writes log content into one
//! destination at a controllable rate. Rate schedulers and log replayers both
//! follow the same control protocol:
//!
//! ```text
//!   orchestrator ── Control::SetRate / Control::Stop ──► worker thread
//!        │              (rendezvous channel)               │
//!        └──────────── EmitStats (atomics) ◄───────────────┘
//! ```
//!
//! The worker thread is the only owner of its pacing state. A control
//! message is handed over synchronously, so once `set_rate` returns the
//! worker has observed the new rate.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for generated or replayed log content
pub type Destination = Box<dyn Write + Send>;

/// Messages from a workload handle to its worker thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Control {
    SetRate(f64),
    Stop,
}

/// Counters updated by a worker while it runs
#[derive(Debug, Default)]
pub struct EmitStats {
    /// Lines or events written to the destination
    pub emitted: AtomicU64,
    /// Replayed events whose timestamp was rewritten
    pub rewritten: AtomicU64,
    /// Replayed events whose timestamp could not be parsed
    pub unparsed: AtomicU64,
    /// Failed writes (a worker stops after its first failure)
    pub write_errors: AtomicU64,
}

impl EmitStats {
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn rewritten(&self) -> u64 {
        self.rewritten.load(Ordering::Relaxed)
    }

    pub fn unparsed(&self) -> u64 {
        self.unparsed.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A rate-controllable writer running in the background
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Change the target rate; blocks until the worker has taken it
    fn set_rate(&self, rate: f64);

    fn stats(&self) -> &EmitStats;

    /// Stop the worker and wait for it to exit. No writes happen afterwards.
    fn stop(self: Box<Self>);
}

/// One workload per destination, driven together
#[derive(Default)]
pub struct Workloads {
    members: Vec<Box<dyn Workload>>,
}

impl Workloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, workload: Box<dyn Workload>) {
        self.members.push(workload);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn set_rate(&self, rate: f64) {
        for member in &self.members {
            member.set_rate(rate);
        }
    }

    /// Total emitted across all members
    pub fn emitted(&self) -> u64 {
        self.members.iter().map(|m| m.stats().emitted()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Workload> {
        self.members.iter().map(|m| m.as_ref())
    }

    pub fn stop(self) {
        for member in self.members {
            member.stop();
        }
    }
}
