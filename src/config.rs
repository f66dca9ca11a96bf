//! Benchmark configuration and value parsing
//!
//! Rates and sizes accept an optional magnitude suffix (`10k`, `1.5m`, `2g`).
//! Durations use the compact `1h30m`, `250ms`, `1.5s` form.

use crate::error::{Error, Result};
use crate::replay::ReplayConfig;
use crate::rotate::RotateConfig;
use crate::scheduler::DEFAULT_TIME_LAYOUT;
use crate::source::FIXED_LOG_LINE;
use std::path::PathBuf;
use std::time::Duration;

/// Parse a non-negative number with an optional `k`, `m` or `g` suffix.
/// Empty input is zero.
pub fn parse_number(value: &str) -> Result<f64> {
    let trimmed = value.trim().to_ascii_lowercase();
    let Some(last) = trimmed.chars().last() else {
        return Ok(0.0);
    };
    let digits = if last.is_ascii_digit() {
        trimmed.as_str()
    } else {
        &trimmed[..trimmed.len() - last.len_utf8()]
    };
    let number: f64 = digits
        .parse()
        .map_err(|_| Error::InvalidNumber(value.to_string()))?;
    if !number.is_finite() || number < 0.0 {
        return Err(Error::InvalidNumber(value.to_string()));
    }
    let scale = match last {
        c if c.is_ascii_digit() => 1.0,
        'k' => 1e3,
        'm' => 1e6,
        'g' => 1e9,
        other => return Err(Error::UnsupportedUnit(other)),
    };
    Ok(number * scale)
}

/// Parse each rate, in order
pub fn parse_rates<S: AsRef<str>>(values: &[S]) -> Result<Vec<f64>> {
    values.iter().map(|v| parse_number(v.as_ref())).collect()
}

/// Parse a size in bytes, e.g. `10m`
pub fn parse_size(value: &str) -> Result<u64> {
    Ok(parse_number(value)? as u64)
}

/// Parse a duration such as `90s`, `1h15m` or `1.5ms`. A bare `0` is zero.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration(value.to_string());
    let mut rest = value.trim();
    rest = rest.strip_prefix('+').unwrap_or(rest);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += number * scale;
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

/// Replay input and how to pace it
#[derive(Debug, Clone)]
pub struct ReplaySource {
    pub path: PathBuf,
    pub config: ReplayConfig,
}

/// Everything a benchmark run needs
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// One workload is started per destination
    pub logs: Vec<PathBuf>,
    /// Rates to sweep, in order
    pub rates: Vec<f64>,
    /// Existing process to monitor
    pub pid: Option<i32>,
    /// Pass the launched agent's output through
    pub pipe_output: bool,
    pub time_layout: String,
    pub line: String,
    /// File whose lines replace the fixed line
    pub source: Option<PathBuf>,
    /// Measurement window per rate
    pub duration: Duration,
    /// Settling time after a rate change
    pub ramp_up: Duration,
    /// Sampling interval
    pub frequency: Duration,
    pub rotate: RotateConfig,
    pub replay: Option<ReplaySource>,
    /// Agent command line; empty when monitoring `pid` or nothing
    pub command: Vec<String>,
    pub stop_grace: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            logs: Vec::new(),
            rates: vec![100.0],
            pid: None,
            pipe_output: false,
            time_layout: DEFAULT_TIME_LAYOUT.to_string(),
            line: FIXED_LOG_LINE.to_string(),
            source: None,
            duration: Duration::from_secs(10),
            ramp_up: Duration::from_secs(1),
            frequency: Duration::from_secs(1),
            rotate: RotateConfig::default(),
            replay: None,
            command: Vec::new(),
            stop_grace: crate::agent::DEFAULT_STOP_GRACE,
        }
    }
}

impl BenchConfig {
    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.logs.is_empty() {
            return Err(Error::Config("at least one log destination is required".into()));
        }
        if self.rates.is_empty() {
            return Err(Error::Config("at least one rate is required".into()));
        }
        if self.frequency.is_zero() {
            return Err(Error::Config("sampling frequency must be positive".into()));
        }
        if self.pid.is_some() && !self.command.is_empty() {
            return Err(Error::Config(
                "monitor either an existing pid or a launched command, not both".into(),
            ));
        }
        Ok(())
    }
}
