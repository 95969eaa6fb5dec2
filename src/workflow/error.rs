//! Failures of the snapshot workflow

use super::snapshot::WorkflowState;
use crate::test::assertions::AssertionFailure;
use crate::test::client::ClientError;
use crate::test::teardown::TeardownError;
use crate::test::wait::{TimeoutError, WaitError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The reason why a workflow step failed
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("setting up {resource} failed")]
    FatalSetup {
        resource: String,
        #[source]
        source: ClientError,
    },
    #[error("unable to find a ready and schedulable node")]
    NoSchedulableNode,
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("the run was cancelled while working on {resource}")]
    Cancelled { resource: String },
    #[error("the run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("the run panicked: {0}")]
    Panicked(String),
    #[error("{0} teardown action(s) failed")]
    TeardownFailed(usize),
}

impl From<WaitError> for WorkflowError {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Timeout(timeout) => WorkflowError::Timeout(timeout),
            WaitError::Client { source, .. } => WorkflowError::Client(source),
            WaitError::Cancelled { resource } => WorkflowError::Cancelled { resource },
        }
    }
}

/// A failed run
///
/// The failure carries the last state the workflow reached, the failed step
/// and all teardown errors. Teardown errors never replace the primary
/// error.
#[derive(Debug)]
pub struct RunFailure {
    pub state: WorkflowState,
    pub step: &'static str,
    pub error: WorkflowError,
    pub teardown_errors: Vec<TeardownError>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Snapshot workflow failed in state [{:?}] ({}): {}",
            self.state, self.step, self.error
        )?;
        if let WorkflowError::FatalSetup { source, .. } = &self.error {
            write!(f, ": {}", source)?;
        }
        for teardown_error in &self.teardown_errors {
            write!(f, "\n  additionally {}", teardown_error)?;
        }
        Ok(())
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
