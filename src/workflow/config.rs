//! Options of the snapshot workflow

use super::topology::Topology;
use crate::test::client::DeletionPolicy;
use crate::test::wait::PollPolicy;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

pub const ENV_DATASTORE_URL: &str = "SHARED_VSPHERE_DATASTORE_URL";
pub const ENV_STORAGE_POLICY: &str = "STORAGE_POLICY_FOR_SHARED_DATASTORES";
pub const ENV_CLUSTER_FLAVOR: &str = "CLUSTER_FLAVOR";
pub const ENV_SUPERVISOR_NAMESPACE: &str = "SUPERVISOR_CLUSTER_NAMESPACE";
pub const ENV_NAMESPACE: &str = "E2E_TEST_NAMESPACE";

/// Options of a single workflow run
///
/// Every option has a default, so a YAML document only needs to contain
/// the options which differ.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct WorkflowConfig {
    pub namespace: String,
    pub topology: Topology,
    pub storage_class_name: String,
    pub provisioner: String,
    pub datastore_url: Option<String>,
    pub storage_policy_name: Option<String>,
    /// Additional parameters of the storage class
    pub storage_class_parameters: BTreeMap<String, String>,
    pub claim_name: String,
    pub claim_size: String,
    /// Storage class which the claim references instead of the created one
    pub claim_storage_class: Option<String>,
    pub snapshot_class_name: String,
    pub snapshot_driver: String,
    pub snapshot_name: String,
    pub deletion_policy: DeletionPolicy,
    /// Appends a random suffix to all names so that runs can share a
    /// cluster.
    pub unique_names: bool,
    /// Compares the provisioned with the requested capacity.
    pub verify_capacity: bool,
    pub timeouts: WorkflowTimeouts,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            namespace: String::from("default"),
            topology: Topology::Vanilla,
            storage_class_name: String::from("sc1"),
            provisioner: String::from("csi.vsphere.vmware.com"),
            datastore_url: None,
            storage_policy_name: None,
            storage_class_parameters: BTreeMap::new(),
            claim_name: String::from("test-claim"),
            claim_size: String::from("2Gi"),
            claim_storage_class: None,
            snapshot_class_name: String::from("test-snap-class"),
            snapshot_driver: String::from("csi.vsphere.vmware.com"),
            snapshot_name: String::from("test-snapshot-1"),
            deletion_policy: DeletionPolicy::Delete,
            unique_names: true,
            verify_capacity: false,
            timeouts: WorkflowTimeouts::default(),
        }
    }
}

impl WorkflowConfig {
    /// Reads the configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Workflow configuration is invalid")
    }

    /// Reads the configuration from the environment of the test run.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration from the given variable lookup.
    ///
    /// The vanilla topology requires the datastore URL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = WorkflowConfig::default();

        if let Some(flavor) = lookup(ENV_CLUSTER_FLAVOR) {
            config.topology = Topology::from_flavor(&flavor, lookup(ENV_SUPERVISOR_NAMESPACE))?;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        config.datastore_url = lookup(ENV_DATASTORE_URL);
        config.storage_policy_name = lookup(ENV_STORAGE_POLICY);

        if config.topology == Topology::Vanilla && config.datastore_url.is_none() {
            return Err(anyhow!(
                "Environment variable [{}] must be set for a vanilla cluster",
                ENV_DATASTORE_URL
            ));
        }

        Ok(config)
    }

    /// Parameters of the storage class including the ones which the
    /// topology adds.
    pub fn effective_storage_class_parameters(&self) -> BTreeMap<String, String> {
        let mut parameters = self.storage_class_parameters.clone();
        parameters.extend(self.topology.storage_class_parameters(self));
        parameters
    }
}

/// Timeouts of the waiting steps
///
/// In YAML all durations are given in whole seconds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct WorkflowTimeouts {
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    #[serde(with = "seconds")]
    pub claim_bound: Duration,
    #[serde(with = "seconds")]
    pub snapshot_ready: Duration,
    #[serde(with = "seconds")]
    pub content_deleted: Duration,
    #[serde(with = "seconds")]
    pub volume_deleted: Duration,
    /// Upper bound for the whole run including all waits
    #[serde(with = "optional_seconds")]
    pub run_deadline: Option<Duration>,
}

impl Default for WorkflowTimeouts {
    fn default() -> Self {
        WorkflowTimeouts {
            poll_interval: Duration::from_secs(2),
            claim_bound: Duration::from_secs(60),
            snapshot_ready: Duration::from_secs(300),
            content_deleted: Duration::from_secs(300),
            volume_deleted: Duration::from_secs(300),
            run_deadline: None,
        }
    }
}

impl WorkflowTimeouts {
    pub fn claim_bound(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.claim_bound)
    }

    pub fn snapshot_ready(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.snapshot_ready)
    }

    pub fn content_deleted(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.content_deleted)
    }

    pub fn volume_deleted(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.volume_deleted)
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
