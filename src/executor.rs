//! Triggered-action execution.
//!
//! The monitor invokes the executor at most once per run. Failures are
//! reported to the operator but never retried.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::process::Command;

use crate::config::Action;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to launch {0}: {1}")]
    Launch(String, #[source] std::io::Error),
    #[error("command exited with {0}")]
    Failed(std::process::ExitStatus),
}

/// A capability that performs the configured action.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<(), ExecError>;
}

/// Runs the action as a child process. Arguments are passed directly,
/// never through a shell.
#[derive(Debug, Default)]
pub struct CommandExecutor;

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, action: &Action) -> Result<(), ExecError> {
        let status = Command::new(&action.program)
            .args(&action.args)
            .status()
            .await
            .map_err(|e| ExecError::Launch(action.program.clone(), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Failed(status))
        }
    }
}
