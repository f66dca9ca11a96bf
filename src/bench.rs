//! Benchmark orchestration
//!
//! ```text
//!   for each rate:
//!     set rate on every workload ── ramp-up ── sample every `frequency`
//!                                              until `duration` elapsed
//!     summarize samples ──► RateReport
//!   stop workloads, then stop the agent
//! ```
//!
//! Samples are taken from the monitored process tree when a pid is known
//! (given directly, or from the launched agent); otherwise the run only
//! generates load.

use crate::agent::Agent;
use crate::config::BenchConfig;
use crate::error::Result;
use crate::layout::TimeLayout;
use crate::replay::Replayer;
use crate::resource::{Process, human_size};
use crate::rotate::RotatingWriter;
use crate::scheduler::RateScheduler;
use crate::source::LineSource;
use crate::workload::{Destination, Workload, Workloads};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// One resource reading of the monitored tree
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Sample {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.1}% MEM: {}",
            self.cpu_percent,
            human_size(self.memory_bytes)
        )
    }
}

/// Summary of one rate's measurement window
#[derive(Debug, Clone, Serialize)]
pub struct RateReport {
    pub rate: f64,
    pub window_secs: f64,
    /// Lines or events written during the window, across all destinations
    pub emitted: u64,
    pub samples: usize,
    pub avg_cpu_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub avg_memory_bytes: Option<f64>,
    pub max_memory_bytes: Option<u64>,
}

impl RateReport {
    pub fn summarize(rate: f64, window: Duration, emitted: u64, samples: &[Sample]) -> Self {
        let n = samples.len();
        let mean = |total: f64| (n > 0).then(|| total / n as f64);
        Self {
            rate,
            window_secs: window.as_secs_f64(),
            emitted,
            samples: n,
            avg_cpu_percent: mean(samples.iter().map(|s| s.cpu_percent).sum()),
            max_cpu_percent: samples.iter().map(|s| s.cpu_percent).reduce(f64::max),
            avg_memory_bytes: mean(samples.iter().map(|s| s.memory_bytes as f64).sum()),
            max_memory_bytes: samples.iter().map(|s| s.memory_bytes).max(),
        }
    }
}

impl fmt::Display for RateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: f64 = 1024.0 * 1024.0;
        write!(f, "Rate {}: {} lines in {:.1}s", self.rate, self.emitted, self.window_secs)?;
        if let (Some(cpu), Some(avg_mem), Some(max_mem)) = (
            self.avg_cpu_percent,
            self.avg_memory_bytes,
            self.max_memory_bytes,
        ) {
            write!(
                f,
                ", average cpu usage: {:.1}%, average memory usage: {:.1}M, maximum memory usage: {:.1}M",
                cpu,
                avg_mem / MIB,
                max_mem as f64 / MIB
            )?;
        }
        Ok(())
    }
}

/// Milestones of a run, in order
#[derive(Debug)]
pub enum Progress<'a> {
    /// Resource monitoring target, if any
    Monitoring { pid: Option<i32> },
    RampingUp { rate: f64, ramp_up: Duration },
    Sample(&'a Sample),
    /// Sampling tick without a monitored process
    Tick,
    RateDone(&'a RateReport),
    Stopping,
}

/// Run the whole sweep described by `config`
pub async fn run<F>(config: &BenchConfig, mut observe: F) -> Result<Vec<RateReport>>
where
    F: FnMut(Progress<'_>),
{
    config.validate()?;
    let layout = TimeLayout::new(&config.time_layout)?;
    let workloads = Arc::new(start_workloads(config, &layout)?);

    let agent = if config.command.is_empty() {
        None
    } else {
        match Agent::start(&config.command, config.pipe_output) {
            Ok(agent) => Some(agent),
            Err(e) => {
                stop_workloads(workloads).await;
                return Err(e);
            }
        }
    };
    let pid = agent.as_ref().and_then(Agent::pid).or(config.pid);
    observe(Progress::Monitoring { pid });
    if pid.is_none() {
        info!("No agent command or pid given, only generating logs");
    }

    let result = sweep(config, &workloads, pid, &mut observe).await;

    observe(Progress::Stopping);
    stop_workloads(workloads).await;
    match agent {
        Some(agent) => settle(result, agent.stop(config.stop_grace).await),
        None => result,
    }
}

/// The sweep outcome wins over a failed agent shutdown, which is only logged
fn settle<T>(result: Result<T>, agent_stopped: Result<ExitStatus>) -> Result<T> {
    if let Err(e) = agent_stopped {
        warn!(error = %e, "Agent stop failed");
    }
    result
}

/// One workload per destination: a replay if configured, else a scheduler
fn start_workloads(config: &BenchConfig, layout: &TimeLayout) -> Result<Workloads> {
    let lines = match &config.source {
        Some(path) => LineSource::from_file(path)?,
        None => LineSource::fixed(config.line.clone()),
    };

    let mut workloads = Workloads::new();
    for path in &config.logs {
        let dest: Destination = Box::new(RotatingWriter::create(path, config.rotate.clone())?);
        let name = path.display().to_string();
        let workload: Box<dyn Workload> = match &config.replay {
            Some(replay) => {
                let source = BufReader::new(File::open(&replay.path)?);
                Box::new(Replayer::spawn(name, source, dest, &replay.config)?)
            }
            None => Box::new(RateScheduler::spawn(
                name,
                dest,
                lines.clone(),
                layout.clone(),
                0.0,
            )?),
        };
        workloads.push(workload);
    }
    info!(destinations = workloads.len(), "Workloads started");
    Ok(workloads)
}

async fn stop_workloads(workloads: Arc<Workloads>) {
    // Stopping joins worker threads
    let stopped = tokio::task::spawn_blocking(move || match Arc::try_unwrap(workloads) {
        Ok(workloads) => workloads.stop(),
        Err(_) => warn!("Workloads still shared, leaving them to stop on drop"),
    });
    if stopped.await.is_err() {
        warn!("Workload shutdown panicked");
    }
}

/// Hand the rate to every worker off the async threads; each handoff waits
/// for its worker to take the message.
async fn apply_rate(workloads: &Arc<Workloads>, rate: f64) {
    let group = Arc::clone(workloads);
    if tokio::task::spawn_blocking(move || group.set_rate(rate))
        .await
        .is_err()
    {
        warn!(rate, "Rate change panicked");
    }
}

async fn sweep<F>(
    config: &BenchConfig,
    workloads: &Arc<Workloads>,
    pid: Option<i32>,
    observe: &mut F,
) -> Result<Vec<RateReport>>
where
    F: FnMut(Progress<'_>),
{
    let mut reports = Vec::with_capacity(config.rates.len());

    for &rate in &config.rates {
        apply_rate(workloads, rate).await;
        info!(rate, ramp_up = ?config.ramp_up, "Ramping up");
        observe(Progress::RampingUp {
            rate,
            ramp_up: config.ramp_up,
        });
        tokio::time::sleep(config.ramp_up).await;

        let emitted_before = workloads.emitted();
        let start = Instant::now();
        let mut ticker = tokio::time::interval(config.frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut process = match pid {
            Some(pid) => {
                let mut process = Process::find(pid)?;
                // Baseline for the first CPU reading
                process.update()?;
                ticker.tick().await;
                Some(process)
            }
            None => None,
        };

        let mut samples = Vec::new();
        while start.elapsed() < config.duration {
            match process.as_mut() {
                Some(process) => {
                    process.update()?;
                    let sample = Sample {
                        cpu_percent: process.cpu_percent(),
                        memory_bytes: process.memory(),
                    };
                    observe(Progress::Sample(&sample));
                    samples.push(sample);
                }
                None => observe(Progress::Tick),
            }
            ticker.tick().await;
        }

        let window = start.elapsed();
        let emitted = workloads.emitted().saturating_sub(emitted_before);
        let report = RateReport::summarize(rate, window, emitted, &samples);
        info!(
            rate,
            emitted,
            samples = report.samples,
            avg_cpu = ?report.avg_cpu_percent,
            "Rate finished"
        );
        observe(Progress::RateDone(&report));
        reports.push(report);
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplaySource;
    use crate::error::Error;
    use crate::replay::ReplayConfig;
    use crate::workload::EmitStats;
    use std::fs;
    use std::io;

    fn quick_config(dir: &std::path::Path) -> BenchConfig {
        BenchConfig {
            logs: vec![dir.join("a.log"), dir.join("b.log")],
            rates: vec![500.0, 0.0],
            duration: Duration::from_millis(300),
            ramp_up: Duration::from_millis(50),
            frequency: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_report_summary() {
        let samples = [
            Sample {
                cpu_percent: 10.0,
                memory_bytes: 100,
            },
            Sample {
                cpu_percent: 30.0,
                memory_bytes: 300,
            },
        ];
        let report = RateReport::summarize(100.0, Duration::from_secs(10), 1000, &samples);
        assert_eq!(report.samples, 2);
        assert_eq!(report.avg_cpu_percent, Some(20.0));
        assert_eq!(report.max_cpu_percent, Some(30.0));
        assert_eq!(report.avg_memory_bytes, Some(200.0));
        assert_eq!(report.max_memory_bytes, Some(300));

        let empty = RateReport::summarize(100.0, Duration::from_secs(10), 0, &[]);
        assert_eq!(empty.avg_cpu_percent, None);
        assert!(empty.to_string().starts_with("Rate 100: 0 lines"));
    }

    #[test]
    fn test_sample_display() {
        let sample = Sample {
            cpu_percent: 12.345,
            memory_bytes: 5 * 1024 * 1024,
        };
        assert_eq!(sample.to_string(), "CPU: 12.3% MEM: 5120KB");
    }

    #[tokio::test]
    async fn test_sweep_without_monitoring() {
        let dir = tempfile::tempdir().unwrap();
        let config = quick_config(dir.path());

        let mut ticks = 0;
        let reports = run(&config, |p| {
            if let Progress::Tick = p {
                ticks += 1;
            }
        })
        .await
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports[0].emitted > 0);
        assert_eq!(reports[1].emitted, 0);
        // Measured window, never shorter than the configured duration
        for report in &reports {
            assert!(report.window_secs >= 0.3, "window {}", report.window_secs);
            assert!(report.window_secs < 1.0, "window {}", report.window_secs);
        }
        assert_eq!(reports[0].samples, 0);
        assert!(ticks >= 4);
        for name in ["a.log", "b.log"] {
            let text = fs::read_to_string(dir.path().join(name)).unwrap();
            assert!(text.lines().count() > 0);
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sweep_samples_own_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            pid: Some(std::process::id() as i32),
            rates: vec![200.0],
            ..quick_config(dir.path())
        };

        let mut samples = Vec::new();
        let reports = run(&config, |p| {
            if let Progress::Sample(s) = p {
                samples.push(*s);
            }
        })
        .await
        .unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].samples >= 1);
        assert_eq!(reports[0].samples, samples.len());
        assert!(reports[0].max_memory_bytes.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_launched_agent_is_monitored_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            rates: vec![100.0],
            command: vec!["sleep".into(), "30".into()],
            ..quick_config(dir.path())
        };

        let mut monitored = None;
        let started = Instant::now();
        let reports = run(&config, |p| {
            if let Progress::Monitoring { pid } = p {
                monitored = pid;
            }
        })
        .await
        .unwrap();

        assert!(monitored.is_some());
        assert!(reports[0].samples >= 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_replay_workloads() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.log");
        fs::write(&input, "one\ntwo\nthree\n").unwrap();
        let config = BenchConfig {
            logs: vec![dir.path().join("out.log")],
            rates: vec![1000.0],
            replay: Some(ReplaySource {
                path: input,
                config: ReplayConfig::default(),
            }),
            ..quick_config(dir.path())
        };

        run(&config, |_| {}).await.unwrap();
        let out = fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(out, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_failed_agent_stop_keeps_reports() {
        let reports = vec![RateReport::summarize(10.0, Duration::from_secs(1), 10, &[])];
        let failed = Err(Error::Io(io::Error::new(io::ErrorKind::Other, "wait failed")));

        let kept = settle(Ok(reports), failed).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].emitted, 10);
    }

    /// Workload whose rate handoff stalls, like a worker stuck in a slow write
    #[derive(Default)]
    struct StallingWorkload {
        stats: EmitStats,
    }

    impl Workload for StallingWorkload {
        fn name(&self) -> &str {
            "stalling"
        }

        fn set_rate(&self, _rate: f64) {
            std::thread::sleep(Duration::from_millis(200));
        }

        fn stats(&self) -> &EmitStats {
            &self.stats
        }

        fn stop(self: Box<Self>) {}
    }

    #[tokio::test]
    async fn test_rate_handoff_does_not_block_runtime() {
        let mut group = Workloads::new();
        group.push(Box::new(StallingWorkload::default()));
        let workloads = Arc::new(group);

        let started = Instant::now();
        let (handoff_done, timer_done) = tokio::join!(
            async {
                apply_rate(&workloads, 100.0).await;
                started.elapsed()
            },
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                started.elapsed()
            }
        );

        assert!(handoff_done >= Duration::from_millis(200));
        assert!(timer_done < Duration::from_millis(150), "timer at {:?}", timer_done);
        stop_workloads(workloads).await;
    }

    #[tokio::test]
    async fn test_invalid_layout_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            time_layout: String::new(),
            ..quick_config(dir.path())
        };
        assert!(run(&config, |_| {}).await.is_err());
        assert!(!dir.path().join("a.log").exists());
    }
}
