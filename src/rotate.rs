//! Size and time based file rotation
//!
//! [`RotatingWriter`] wraps a destination file and swaps it out before a
//! write once either threshold is crossed. [`FileRotator`] performs the swap
//! by shifting numbered backups:
//!
//! ```text
//!   app.log.1 -> app.log.2 -> ... -> app.log.<keep>   (oldest dropped)
//!   app.log   -> app.log.1
//!   (new)        app.log
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Produces a fresh writer, retiring the previous one
pub trait Rotate: Send {
    type Writer: Write + Send;

    fn rotate(&mut self) -> io::Result<Self::Writer>;
}

/// Rotates a file on disk through numbered backups
#[derive(Debug, Clone)]
pub struct FileRotator {
    path: PathBuf,
    keep: usize,
    created: bool,
}

impl FileRotator {
    /// `keep` backups are retained; zero truncates the file in place
    pub fn new(path: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            path: path.into(),
            keep,
            created: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of backup `n`; `0` is the live file
    pub fn backup_path(&self, n: usize) -> PathBuf {
        if n == 0 {
            return self.path.clone();
        }
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn shift_backups(&self) -> io::Result<()> {
        for n in (0..self.keep).rev() {
            let from = self.backup_path(n);
            match fs::rename(&from, self.backup_path(n + 1)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Rotate for FileRotator {
    type Writer = File;

    fn rotate(&mut self) -> io::Result<File> {
        // The first call only creates the file
        if self.created {
            self.shift_backups()?;
            info!(path = %self.path.display(), keep = self.keep, "Rotated log file");
        }
        let file = File::create(&self.path)?;
        self.created = true;
        Ok(file)
    }
}

/// Rotation thresholds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotateConfig {
    /// Backups to retain
    pub keep: usize,
    /// Rotate when this much time passed since the first write after the
    /// last rotation
    pub interval: Option<Duration>,
    /// Rotate before a write that would take the file past this many bytes;
    /// zero disables
    pub size: u64,
}

impl RotateConfig {
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some() || self.size > 0
    }
}

/// Writer that rotates its target according to a [`RotateConfig`]
pub struct RotatingWriter<R: Rotate> {
    rotator: R,
    current: R::Writer,
    config: RotateConfig,
    written: u64,
    rotate_at: Option<Instant>,
}

impl RotatingWriter<FileRotator> {
    /// Create (or truncate) `path` and rotate it per `config`
    pub fn create(path: impl Into<PathBuf>, config: RotateConfig) -> io::Result<Self> {
        let rotator = FileRotator::new(path, config.keep);
        Self::new(rotator, config)
    }
}

impl<R: Rotate> RotatingWriter<R> {
    pub fn new(mut rotator: R, config: RotateConfig) -> io::Result<Self> {
        let current = rotator.rotate()?;
        Ok(Self {
            rotator,
            current,
            config,
            written: 0,
            rotate_at: None,
        })
    }

    pub fn config(&self) -> &RotateConfig {
        &self.config
    }

    /// Bytes written since the last rotation
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn rotate(&mut self) -> io::Result<()> {
        self.current.flush()?;
        self.current = self.rotator.rotate()?;
        self.written = 0;
        self.rotate_at = None;
        Ok(())
    }

    fn due(&mut self, incoming: usize) -> bool {
        if let Some(interval) = self.config.interval {
            let now = Instant::now();
            match self.rotate_at {
                None => self.rotate_at = Some(now + interval),
                Some(at) if now >= at => return true,
                Some(_) => {}
            }
        }
        self.config.size > 0
            && self.written > 0
            && self.written + incoming as u64 > self.config.size
    }
}

impl<R: Rotate> Write for RotatingWriter<R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.due(buf.len()) {
            debug!(written = self.written, "Rotation threshold reached");
            self.rotate()?;
            // Re-arm the interval from this write
            self.due(buf.len());
        }
        let n = self.current.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current.flush()
    }
}
