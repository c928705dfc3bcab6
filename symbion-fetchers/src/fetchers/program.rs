//! Program fetcher: agent output produced by a local command (datasource programs)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Child, Command};
use std::time::Duration;
use tracing::{debug, warn};

use super::RawFetcher;
use crate::error::FetchFailure;
use crate::mode::Mode;
use crate::process;
use crate::types::RawData;

const EXIT_COMMAND_NOT_FOUND: i64 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramParams {
    pub cmdline: String,
    pub stdin: Option<String>,
    /// Under the CMC the command is not put in its own process group.
    pub is_cmc: bool,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

pub struct ProgramFetcher {
    params: ProgramParams,
    child: Option<Child>,
}

impl ProgramFetcher {
    pub fn new(params: ProgramParams) -> Self {
        Self { params, child: None }
    }

    pub fn params(&self) -> &ProgramParams {
        &self.params
    }

    fn command(&self) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(&self.params.cmdline);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if !self.params.is_cmc {
                command.process_group(0);
            }
        }
        command
    }
}

impl RawFetcher for ProgramFetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        debug!("Calling: {}", self.params.cmdline);
        let stdin = self.params.stdin.as_ref().map(|s| s.clone().into_bytes());
        self.child = Some(process::spawn(self.command(), &self.params.cmdline, stdin)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    warn!("Cannot kill '{}': {}", self.params.cmdline, e);
                }
            }
            let _ = child.wait();
        }
    }

    fn fetch_raw(&mut self, _mode: Mode) -> Result<RawData, FetchFailure> {
        let child = self
            .child
            .take()
            .ok_or_else(|| FetchFailure::transport("Program fetcher is not open"))?;
        let output = process::wait(child, &self.params.cmdline, self.params.timeout)?;

        match output.exit_code {
            Some(0) => Ok(RawData::Agent(output.stdout)),
            Some(EXIT_COMMAND_NOT_FOUND) => Err(FetchFailure::transport(format!(
                "Program '{}' not found (exit code 127)",
                self.params.cmdline
            ))),
            Some(code) => Err(FetchFailure::transport(format!(
                "Agent exited with code {}: {}",
                code,
                output.stderr_lossy()
            ))),
            None => Err(FetchFailure::transport(format!(
                "Program '{}' was terminated by a signal: {}",
                self.params.cmdline,
                output.stderr_lossy()
            ))),
        }
    }
}

impl fmt::Display for ProgramFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramFetcher({})", self.params.cmdline)
    }
}
