//! Subprocess execution with a time limit
//!
//! Shared by the program fetcher, the SNMP command line backend and the
//! ipmitool session. Time limits are enforced by `process_control`, which
//! terminates the child once the limit elapses.

use process_control::{ChildExt, Control};
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{program} did not finish within {}", humantime::format_duration(*.limit))]
    TimedOut { program: String, limit: Duration },
    #[error("Failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to wait for {program}: {source}")]
    Wait { program: String, source: io::Error },
}

/// Collected result of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i64>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Spawns `command` with piped stdio and feeds `stdin` from a helper thread.
pub fn spawn(mut command: Command, program: &str, stdin: Option<Vec<u8>>) -> Result<Child, CommandError> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;
    debug!("Spawned {} (pid {})", program, child.id());

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let name = program.to_string();
        thread::spawn(move || {
            if let Err(e) = pipe.write_all(&data) {
                warn!("Writing stdin of {} failed: {}", name, e);
            }
        });
    }
    Ok(child)
}

/// Waits for a spawned child, killing it when `time_limit` elapses.
pub fn wait(child: Child, program: &str, time_limit: Option<Duration>) -> Result<CommandOutput, CommandError> {
    let wait_error = |source| CommandError::Wait {
        program: program.to_string(),
        source,
    };

    let output = match time_limit {
        Some(limit) => child
            .controlled_with_output()
            .time_limit(limit)
            .terminate_for_timeout()
            .wait()
            .map_err(wait_error)?
            .ok_or_else(|| CommandError::TimedOut {
                program: program.to_string(),
                limit,
            })?,
        None => child
            .controlled_with_output()
            .wait()
            .map_err(wait_error)?
            .ok_or_else(|| wait_error(io::Error::new(io::ErrorKind::Other, "no exit status")))?,
    };

    Ok(CommandOutput {
        exit_code: output.status.code().map(i64::from),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Spawn and wait in one go.
pub fn run(command: Command, program: &str, stdin: Option<Vec<u8>>, time_limit: Option<Duration>) -> Result<CommandOutput, CommandError> {
    let child = spawn(command, program, stdin)?;
    wait(child, program, time_limit)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn collects_stdout_and_exit_code() {
        let output = run(sh("cat; exit 3"), "sh", Some(b"hello".to_vec()), Some(Duration::from_secs(10))).unwrap();
        assert_eq!(output.stdout, b"hello");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn time_limit_kills_the_child() {
        let err = run(sh("sleep 5"), "sh", None, Some(Duration::from_millis(200))).unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }
}
