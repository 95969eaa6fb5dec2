//! The snapshot lifecycle workflow and its configuration

mod config;
mod error;
mod snapshot;
mod topology;

pub use config::{WorkflowConfig, WorkflowTimeouts};
pub use error::{RunFailure, WorkflowError};
pub use snapshot::{ResourceNames, SnapshotWorkflow, WorkflowReport, WorkflowState};
pub use topology::{Topology, DEFAULT_STORAGE_QUOTA};
