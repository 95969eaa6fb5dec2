//! Building blocks of lifecycle tests against a cluster

pub mod wait;

/// Everything a test case usually needs
pub mod prelude {
    pub use super::assertions::{AssertionFailure, CheckAssertions, CheckResult};
    pub use super::client::{
        ClaimPhase, ClientError, ControlPlane, DeletionPolicy, QuotaClient, ResourceKind,
        ResourceRef, VolumeBackend,
    };
    pub use super::kube::{KubeClient, TestKubeClient};
    pub use super::teardown::{Teardown, TeardownScope};
    pub use super::wait::{wait_until, Check, PollPolicy};
    pub use crate::logging::init_logging;
    pub use crate::workflow::{
        RunFailure, SnapshotWorkflow, Topology, WorkflowConfig, WorkflowError, WorkflowReport,
        WorkflowState,
    };
    pub use spectral::prelude::*;
}
