//! Bounded waiting on long-running hypervisor tasks

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::{Hypervisor, HypervisorError, TaskHandle, TaskStatus};

/// Why a wait did not succeed
#[derive(Debug, Error)]
pub enum WaitError {
    /// The task reached a terminal state with a non-OK exit status
    #[error("Task failed: {0}")]
    Failed(String),

    /// The task was still running when the deadline elapsed
    #[error("Task did not complete within {0:?}")]
    TimedOut(Duration),

    /// Polling itself failed
    #[error(transparent)]
    Remote(#[from] HypervisorError),
}

/// Polls a remote task to completion or deadline.
///
/// The poll loop is plain async code under `tokio::time::timeout`: a caller
/// that races it against its own deadline or shutdown signal cancels it by
/// dropping the future. No locks are held while waiting.
#[derive(Debug, Clone)]
pub struct TaskWaiter {
    poll_interval: Duration,
    timeout: Duration,
}

impl TaskWaiter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Wait until `task` reports a terminal state.
    ///
    /// `Ok(())` only for an OK exit status; a terminal non-OK status is
    /// `WaitError::Failed`, distinct from `WaitError::TimedOut`.
    pub async fn wait(&self, hypervisor: &dyn Hypervisor, task: &TaskHandle) -> Result<(), WaitError> {
        let poll = async {
            loop {
                match hypervisor.task_status(task).await? {
                    TaskStatus::Running => {
                        debug!(task = %task, "Task still running");
                    }
                    TaskStatus::Stopped { exit_status } if exit_status == "OK" => {
                        debug!(task = %task, "Task completed");
                        return Ok(());
                    }
                    TaskStatus::Stopped { exit_status } => {
                        return Err(WaitError::Failed(exit_status));
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(WaitError::TimedOut(self.timeout)),
        }
    }
}
