//! logbench - measure a log agent under controlled log load
//!
//! Usage:
//!   logbench --log /tmp/a.log --rate 1,100,1k -- fluent-bit -c agent.conf
//!   logbench --log /tmp/a.log,/tmp/b.log --rate 10k -p 4242
//!   logbench --log /tmp/a.log --replay app.log --replay-layout '^\[(2006-01-02 15:04:05)\]'

use clap::Parser;
use logbench::config::{self, ReplaySource};
use logbench::{BenchConfig, Progress, ReplayConfig, RotateConfig};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logbench")]
#[command(about = "Generate log load at controlled rates and measure the agent consuming it")]
struct Cli {
    /// Log files to write to (repeat or comma-separate)
    #[arg(long = "log", value_delimiter = ',', required = true)]
    logs: Vec<PathBuf>,

    /// Rates to test in lines per second, e.g. 1,100,1k,10k
    #[arg(long = "rate", value_delimiter = ',', default_value = "100")]
    rates: Vec<String>,

    /// Pid of an already running agent to monitor
    #[arg(short = 'p')]
    pid: Option<i32>,

    /// Pipe the launched agent's stdout and stderr through
    #[arg(short = 'o')]
    pipe_output: bool,

    /// Timestamp layout in Go reference-time form
    #[arg(long = "timelayout", default_value = logbench::scheduler::DEFAULT_TIME_LAYOUT)]
    time_layout: String,

    /// Content of each generated line
    #[arg(long, default_value = logbench::source::FIXED_LOG_LINE)]
    line: String,

    /// Cycle through the lines of this file instead of --line
    #[arg(long)]
    source: Option<PathBuf>,

    /// Measurement duration per rate
    #[arg(short = 't', default_value = "10s")]
    duration: String,

    /// Settling time after each rate change, not measured
    #[arg(short = 'r', default_value = "1s")]
    ramp_up: String,

    /// Sampling interval
    #[arg(short = 'f', default_value = "1s")]
    frequency: String,

    /// Rotated files to keep
    #[arg(long = "rotatekeep", default_value_t = 0)]
    rotate_keep: usize,

    /// Rotate when a file would exceed this size, e.g. 10m
    #[arg(long = "rotatesize")]
    rotate_size: Option<String>,

    /// Rotate files this long after their first write
    #[arg(long = "rotatetime")]
    rotate_time: Option<String>,

    /// Replay this log instead of generating lines
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Timestamp layout or boundary pattern of the replayed log
    #[arg(long = "replay-layout")]
    replay_layout: Option<String>,

    /// Pattern matching the first line of a replayed event; may use {timestamp}
    #[arg(long)]
    multiline: Option<String>,

    /// Print per-rate reports as JSON
    #[arg(long)]
    json: bool,

    /// Agent command to launch and monitor
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> logbench::Result<BenchConfig> {
        let rates = config::parse_rates(self.rates.as_slice())?;
        let rotate = RotateConfig {
            keep: self.rotate_keep,
            interval: self
                .rotate_time
                .as_deref()
                .map(config::parse_duration)
                .transpose()?
                .filter(|d| !d.is_zero()),
            size: config::parse_size(self.rotate_size.as_deref().unwrap_or_default())?,
        };
        let replay = self.replay.map(|path| ReplaySource {
            path,
            config: ReplayConfig {
                timestamp: self.replay_layout,
                multiline_start: self.multiline,
                rate: rates.first().copied().unwrap_or_default(),
            },
        });

        Ok(BenchConfig {
            logs: self.logs,
            rates,
            pid: self.pid,
            pipe_output: self.pipe_output,
            time_layout: self.time_layout,
            line: self.line,
            source: self.source,
            duration: config::parse_duration(&self.duration)?,
            ramp_up: config::parse_duration(&self.ramp_up)?,
            frequency: config::parse_duration(&self.frequency)?,
            rotate,
            replay,
            command: self.command,
            ..Default::default()
        })
    }
}

fn print_progress(progress: Progress<'_>) {
    match progress {
        Progress::Monitoring { pid: Some(pid) } => println!("Monitoring agent with PID: {}", pid),
        Progress::Monitoring { pid: None } => {
            println!("No agent command or agent pid given, just generating logs instead.")
        }
        Progress::RampingUp { rate, ramp_up } => {
            println!("Ramping up for rate {} for {:?} ...", rate, ramp_up)
        }
        Progress::Sample(sample) => println!("{}", sample),
        Progress::Tick => {
            print!(".");
            let _ = std::io::stdout().flush();
        }
        Progress::RateDone(report) => println!("\n{}\n", report),
        Progress::Stopping => println!("Stopping workloads ..."),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid arguments: {}", e);
            return ExitCode::from(2);
        }
    };

    let reports = if json {
        logbench::bench::run(&config, |_| {}).await
    } else {
        logbench::bench::run(&config, print_progress).await
    };

    match reports {
        Ok(reports) => {
            if json {
                match serde_json::to_string_pretty(&reports) {
                    Ok(out) => println!("{}", out),
                    Err(e) => {
                        eprintln!("Failed to encode reports: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Benchmark failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
