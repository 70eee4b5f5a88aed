//! External process spawning.
//!
//! Decode pipelines run as one `sh -c "a | b | c"` in their own process
//! group. Teardown signals the whole group by id: SIGTERM, a grace period,
//! then SIGKILL.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// A running pipeline.
pub trait PipelineHandle: Send + Sync {
    /// Process group id.
    fn id(&self) -> u32;

    /// Whether the pipeline's shell is still running.
    fn is_alive(&self) -> bool;

    /// Stop the pipeline: terminate, wait up to `grace`, then kill.
    fn terminate(&self, grace: Duration);
}

/// Starts pipelines.
pub trait PipelineSpawner: Send + Sync {
    fn spawn(&self, tag: &str, commands: &[String]) -> Result<Box<dyn PipelineHandle>, String>;
}

/// Runs one-shot shell commands (application scripts, power switches).
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<(), String>;
}

/// Join pipeline stages into one shell command line.
pub fn command_line(commands: &[String]) -> String {
    commands.join(" | ")
}

/// Spawns pipelines through `sh -c`.
#[derive(Debug, Default, Clone)]
pub struct ShellSpawner;

impl PipelineSpawner for ShellSpawner {
    fn spawn(&self, tag: &str, commands: &[String]) -> Result<Box<dyn PipelineHandle>, String> {
        if commands.is_empty() {
            return Err("empty pipeline".to_string());
        }
        let line = command_line(commands);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| format!("failed to spawn pipeline for {tag}: {e}"))?;

        let pgid = child.id();
        debug!("Spawned pipeline {} (pgid {}): {}", tag, pgid, line);
        Ok(Box::new(ShellPipeline {
            pgid,
            child: Mutex::new(child),
        }))
    }
}

struct ShellPipeline {
    pgid: u32,
    child: Mutex<Child>,
}

impl ShellPipeline {
    fn signal_group(&self, signal: libc::c_int) -> bool {
        // SAFETY: killpg only sends a signal; the group id came from our own spawn.
        unsafe { libc::killpg(self.pgid as libc::pid_t, signal) == 0 }
    }

    /// Reap the shell if it exited, and report whether any group member remains.
    fn group_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let _ = child.try_wait();
        self.signal_group(0)
    }
}

impl PipelineHandle for ShellPipeline {
    fn id(&self) -> u32 {
        self.pgid
    }

    fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        matches!(child.try_wait(), Ok(None))
    }

    fn terminate(&self, grace: Duration) {
        if !self.signal_group(libc::SIGTERM) {
            debug!("Pipeline group {} already gone", self.pgid);
        }

        let deadline = Instant::now() + grace;
        while self.group_alive() {
            if Instant::now() >= deadline {
                warn!("Pipeline group {} ignored SIGTERM, killing", self.pgid);
                self.signal_group(libc::SIGKILL);
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let _ = child.wait();
    }
}

/// Runs commands through `sh -c` and waits for them.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<(), String> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| format!("{command}: {e}"))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{command}: exited with {status}"))
        }
    }
}
