//! Detached helper processes for server-list entries.
//!
//! A server line may carry an external program template (a local tunnel
//! helper the agent connects through). The program is spawned during the
//! synchronous startup path, detached, with stdout/stderr tee'd into the
//! agent log and its eventual exit status logged. It is never awaited.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{PolicyError, Result};

use tracing::{error, info, warn};

/// Spawns helper programs referenced by server-list lines.
pub trait ProcessRunner: Send + Sync {
    /// Spawn `command_line` detached. Returns once the process started.
    fn spawn(&self, command_line: &str) -> Result<()>;
}

/// Production runner: `std::process` + pipe-reader threads.
pub struct StdProcessRunner;

impl ProcessRunner for StdProcessRunner {
    fn spawn(&self, command_line: &str) -> Result<()> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            PolicyError::Validation("empty helper program command line".to_string())
        })?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PolicyError::Resource {
                path: command_line.to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        info!(command = command_line, pid = child.id(), "running program");

        if let Some(stdout) = child.stdout.take() {
            let cmd = command_line.to_string();
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    info!(command = %cmd, "{}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let cmd = command_line.to_string();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    warn!(command = %cmd, "{}", line);
                }
            });
        }

        // waiter thread: the child is detached, only its exit is recorded
        let cmd = command_line.to_string();
        thread::spawn(move || match child.wait() {
            Ok(status) => error!(command = %cmd, %status, "sub process exited"),
            Err(e) => error!(command = %cmd, "failed to wait for sub process: {}", e),
        });

        Ok(())
    }
}

/// Runner that records commands without spawning anything. Used by offline
/// collaborator sets and tests.
#[derive(Default)]
pub struct NilProcessRunner {
    commands: parking_lot::Mutex<Vec<String>>,
}

impl NilProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command lines received so far, in spawn order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl ProcessRunner for NilProcessRunner {
    fn spawn(&self, command_line: &str) -> Result<()> {
        self.commands.lock().push(command_line.to_string());
        Ok(())
    }
}
