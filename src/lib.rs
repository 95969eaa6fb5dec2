//! Lifecycle tests of CSI volume snapshots against a Kubernetes cluster
//!
//! ## Usage
//!
//! Add the dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! csi-snapshot-test-commons = { git = "https://github.com/stackabletech/csi-snapshot-test-commons.git", tag = "0.1.0" }
//! ```
//!
//! Then `use` the prelude module in your test files:
//!
//! ```rust
//! use csi_snapshot_test_commons::test::prelude::*;
//! ```
//!
//! ## Example
//!
//! The [`test::kube::TestKubeClient`] runs the
//! [`workflow::SnapshotWorkflow`] against the cluster of the current
//! kubeconfig. The workflow provisions a volume, snapshots it, deletes
//! the snapshot and verifies that the snapshot content follows the
//! deletion policy. All created resources are deleted afterwards, also
//! if a step fails.
//!
//! ```rust,no_run
//! use csi_snapshot_test_commons::test::prelude::*;
//!
//! #[test]
//! pub fn snapshot_content_should_be_deleted_with_the_snapshot() {
//!     init_logging();
//!     let client = TestKubeClient::new();
//!     let config = WorkflowConfig::from_env().expect("Test environment is incomplete");
//!
//!     let report = client.run_snapshot_workflow(&config);
//!
//!     assert_that(&report.state).is_equal_to(WorkflowState::Done);
//! }
//! ```
//!
//! Other clusters can be tested by implementing
//! [`test::client::ControlPlane`], [`test::client::VolumeBackend`] and
//! [`test::client::QuotaClient`].

pub mod logging;
pub mod test;
pub mod workflow;
