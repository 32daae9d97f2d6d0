//! Session launcher used by the leader.
//!
//! Stands in for the application UI: each session is a child process
//! started from the configured command. Exited children are reaped by tokio.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start session '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Launches one child process per session.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    command: Vec<String>,
    launched: u64,
}

impl SessionLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            launched: 0,
        }
    }

    /// Number of sessions started so far.
    pub fn launched(&self) -> u64 {
        self.launched
    }

    /// Start a session. Returns the child pid, or `None` when no command is
    /// configured and there is nothing to start.
    pub fn launch(&mut self) -> Result<Option<u32>, SessionError> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(None);
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SessionError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        self.launched += 1;
        let pid = child.id();
        tracing::info!(program = %program, pid = ?pid, "Session started");

        Ok(pid)
    }
}
