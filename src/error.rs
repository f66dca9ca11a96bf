//! Crate error types

use thiserror::Error;

/// Errors raised while configuring or running a benchmark
#[derive(Error, Debug)]
pub enum Error {
    /// A rate or size string is not a decimal number
    #[error("Invalid number value '{0}'")]
    InvalidNumber(String),

    /// A rate or size string carries an unknown magnitude suffix
    #[error("Unsupported unit '{0}' for rate")]
    UnsupportedUnit(char),

    /// A duration string is not in `1h2m3.5s` form
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    /// A time layout is empty or otherwise unusable
    #[error("Invalid time layout '{layout}': {reason}")]
    InvalidLayout { layout: String, reason: String },

    /// A capturing group was opened in a boundary pattern but never closed
    #[error("Unclosed capturing group in time layout '{0}'")]
    UnclosedGroup(String),

    /// A generated or user supplied regular expression failed to compile
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A timestamp substring does not fit the configured layout
    #[error("Cannot parse '{value}' with layout '{layout}': {reason}")]
    TimestampParse {
        value: String,
        layout: String,
        reason: String,
    },

    /// A line source was built from nothing
    #[error("Line source is empty")]
    EmptySource,

    /// The process to monitor was not present in the process table
    #[error("Process with pid {0} not found")]
    ProcessNotFound(i32),

    /// The monitored process disappeared between two samples
    #[error("Process with pid {0} no longer exists")]
    ProcessGone(i32),

    /// A /proc accounting file had an unexpected shape
    #[error("Malformed {file} for pid {pid}: {reason}")]
    ProcStat {
        pid: i32,
        file: &'static str,
        reason: String,
    },

    /// Benchmark settings that cannot run together
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Subject agent failed to start or stop
    #[error("Agent error: {0}")]
    Agent(String),

    /// Any underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for logbench operations
pub type Result<T> = std::result::Result<T, Error>;
