//! Subject agent process
//!
//! The log agent under test can be launched by the benchmark itself. Its
//! output is discarded unless piping is requested. On shutdown it receives
//! SIGINT and gets a grace period before being killed.

use crate::error::{Error, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Time an agent is given to exit after SIGINT
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// A running agent child process
pub struct Agent {
    program: String,
    child: Child,
}

impl Agent {
    /// Launch `command[0]` with the remaining elements as arguments
    pub fn start(command: &[String], pipe_output: bool) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Agent("empty command".to_string()))?;
        let output = || {
            if pipe_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Agent(format!("failed to start {}: {}", program, e)))?;

        info!(program = %program, pid = ?child.id(), "Agent started");
        Ok(Self {
            program: program.clone(),
            child,
        })
    }

    /// Pid while the process has not been reaped
    pub fn pid(&self) -> Option<i32> {
        self.child.id().map(|id| id as i32)
    }

    /// Interrupt the agent, killing it if it outlives `grace`
    pub async fn stop(mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(pid) = self.pid() {
            // SAFETY: pid belongs to our unreaped child
            if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
                warn!(pid, error = %std::io::Error::last_os_error(), "SIGINT failed");
            }
        }

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    program = %self.program,
                    grace_ms = grace.as_millis() as u64,
                    "Agent still alive after SIGINT, killing"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        info!(program = %self.program, %status, "Agent stopped");
        Ok(status)
    }
}
