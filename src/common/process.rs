//! Bounded external process execution.
//!
//! All external tools (renderer, interpreter, ffmpeg) go through
//! [`run_captured`], which merges stderr into stdout and enforces a deadline.
//! A process that outlives its deadline is killed and reported as
//! [`ProcessError::Timeout`].

use duct::Expression;
use std::io;
use std::process::Output;
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("failed while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Exit status and combined output of a finished process
#[derive(Debug, Clone)]
pub struct CapturedRun {
    pub success: bool,
    pub code: Option<i32>,
    pub log: String,
}

impl CapturedRun {
    fn from_output(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            log: String::from_utf8_lossy(&output.stdout).into_owned(),
        }
    }
}

/// Run `expression` to completion or until `timeout` elapses.
///
/// Non-zero exit is not an error here; callers inspect [`CapturedRun::success`].
pub fn run_captured(
    program: &str,
    expression: Expression,
    timeout: Duration,
) -> Result<CapturedRun, ProcessError> {
    let handle = expression
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .start()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let started = Instant::now();
    loop {
        match handle.try_wait() {
            Ok(Some(output)) => return Ok(CapturedRun::from_output(output)),
            Ok(None) => {}
            Err(source) => {
                return Err(ProcessError::Wait {
                    program: program.to_string(),
                    source,
                });
            }
        }

        if started.elapsed() >= timeout {
            let _ = handle.kill();
            return Err(ProcessError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        sleep(POLL_INTERVAL);
    }
}
