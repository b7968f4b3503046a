//! Supervised build: spawn the child and keep draining the event queue until
//! it exits.

#![allow(missing_docs)]

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::core::config::WatchConfig;
use crate::core::errors::{KslError, Result};
use crate::watch::backend::WatchBackend;
use crate::watch::session::WatchSession;

/// Poll cadence for a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCoordinator {
    /// Upper bound on one readiness wait. Short enough that the kernel queue
    /// cannot fill between drains.
    pub poll_timeout: Duration,
    /// Pause between readiness and the drain; `None` reads immediately.
    pub grace_delay: Option<Duration>,
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

/// What the coordinator captured during a clean run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub polls: u64,
    pub chunks: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

impl RunCoordinator {
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            grace_delay: (config.grace_delay_ms > 0)
                .then(|| Duration::from_millis(config.grace_delay_ms)),
        }
    }

    /// Run `command` to completion while capturing events into `session`.
    ///
    /// The child inherits stdin, stdout and stderr. Once it has exited, one
    /// more drain collects whatever arrived after the last poll. A non-zero
    /// exit becomes [`KslError::ChildFailed`] after that drain.
    pub fn run<B: WatchBackend>(
        &self,
        session: &mut WatchSession<B>,
        command: &mut Command,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| KslError::Spawn { program, source })?;

        let mut polls = 0_u64;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => return Err(abandon(&mut child, wait_error(&err))),
            }
            polls += 1;
            if let Err(err) = session.capture(Some(self.poll_timeout), self.grace_delay) {
                return Err(abandon(&mut child, err));
            }
        };

        session.capture_remaining()?;

        let code = exit_code(status);
        if code != 0 {
            return Err(KslError::ChildFailed { code });
        }

        Ok(RunSummary {
            polls,
            chunks: session.buffer().chunk_count(),
            bytes: session.buffer().total_bytes(),
            elapsed: started.elapsed(),
        })
    }
}

/// Stop a child we can no longer supervise; its events would go unrecorded.
fn abandon(child: &mut Child, err: KslError) -> KslError {
    eprintln!("[KSL-RUN] stopping build (pid {}): {err}", child.id());
    let _ = child.kill();
    let _ = child.wait();
    err
}

fn wait_error(err: &std::io::Error) -> KslError {
    KslError::Resource {
        operation: "waitpid",
        errno: err.raw_os_error().unwrap_or(libc::EIO),
    }
}

/// Shell convention: killed by signal N reports as 128 + N.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}
