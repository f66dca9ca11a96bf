//! Line sources
//!
//! The content emitted after each generated timestamp: either one fixed line
//! repeated forever, or the lines of a file cycled in their original order.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Default content of generated log lines
pub const FIXED_LOG_LINE: &str = "INFO CloudWatchOutput      Amazon::Monitoring::CloudWatchOutput::new - CloudWatchOutput sender=data/cloudwatch/current endpoint=https://monitoring.us-east-1.amazonaws.com maxBytes=76800";

/// Cyclic, non-empty sequence of lines
#[derive(Debug, Clone)]
pub struct LineSource {
    lines: Arc<[String]>,
    next: usize,
}

impl LineSource {
    pub fn fixed(line: impl Into<String>) -> Self {
        Self {
            lines: Arc::from(vec![line.into()]),
            next: 0,
        }
    }

    pub fn from_lines(lines: Vec<String>) -> Result<Self> {
        if lines.is_empty() {
            return Err(Error::EmptySource);
        }
        Ok(Self {
            lines: Arc::from(lines),
            next: 0,
        })
    }

    /// Read every line of `path`, without line terminators
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let lines = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
        Self::from_lines(lines)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Next line, wrapping around at the end
    pub fn next_line(&mut self) -> &str {
        let line = &self.lines[self.next];
        self.next = (self.next + 1) % self.lines.len();
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fixed_line_repeats() {
        let mut source = LineSource::fixed("hello");
        assert_eq!(source.next_line(), "hello");
        assert_eq!(source.next_line(), "hello");
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_file_lines_cycle_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();
        write!(file, "third").unwrap();

        let mut source = LineSource::from_file(file.path()).unwrap();
        let seen: Vec<String> = (0..5).map(|_| source.next_line().to_string()).collect();
        assert_eq!(seen, ["first", "second", "third", "first", "second"]);
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            LineSource::from_file(file.path()),
            Err(Error::EmptySource)
        ));
    }
}
