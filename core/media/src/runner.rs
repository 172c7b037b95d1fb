//! Running external conversion binaries.

use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::process::Command;
use tracing::{debug, error};

use flextk_common::{Error, Result};

/// Captured output of a successful tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes an external program to completion.
///
/// Implementations must map a non-zero exit status to
/// [`Error::Conversion`] carrying the tool's stderr, and a program that
/// cannot be spawned to [`Error::Conversion`] naming the program.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput>;
}

/// Runs programs on the host through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl Runner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    Error::Conversion(format!("{} is not installed or not on PATH", program))
                }
                _ => Error::Conversion(format!("Failed to start {}: {}", program, e)),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            error!("{} exited with {}", program, code);
            return Err(Error::Conversion(format!(
                "{} exited with {}: {}",
                program,
                code,
                stderr.trim()
            )));
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
