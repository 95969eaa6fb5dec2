//! Deployment topologies of the cluster under test

use super::config::WorkflowConfig;
use super::error::WorkflowError;
use crate::test::client::{ClientResult, ControlPlane, QuotaClient};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

pub const PARAM_DATASTORE_URL: &str = "DatastoreURL";
pub const PARAM_STORAGE_POLICY_NAME: &str = "storagepolicyname";

/// Storage quota which a guest cluster's supervisor namespace is reset to
pub const DEFAULT_STORAGE_QUOTA: &str = "20Gi";

/// The cluster flavors which the workflow runs on
///
/// The topology is chosen once per run and supplies the storage class
/// parameters as well as the hooks around the workflow.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub enum Topology {
    /// A plain Kubernetes cluster
    Vanilla,
    /// The supervisor cluster of a managed deployment
    Supervisor,
    /// A guest cluster whose volumes live in a supervisor namespace
    #[serde(rename_all = "camelCase")]
    Guest { supervisor_namespace: String },
}

impl Default for Topology {
    fn default() -> Self {
        Topology::Vanilla
    }
}

impl Topology {
    /// Parses the value of the `CLUSTER_FLAVOR` variable.
    pub fn from_flavor(flavor: &str, supervisor_namespace: Option<String>) -> Result<Self> {
        match flavor {
            "VANILLA" => Ok(Topology::Vanilla),
            "WORKLOAD" => Ok(Topology::Supervisor),
            "GC" => supervisor_namespace
                .map(|supervisor_namespace| Topology::Guest {
                    supervisor_namespace,
                })
                .ok_or_else(|| anyhow!("A guest cluster requires the supervisor namespace")),
            other => Err(anyhow!("Cluster flavor [{}] is not supported", other)),
        }
    }

    /// Storage class parameters which this topology requires
    pub fn storage_class_parameters(&self, config: &WorkflowConfig) -> BTreeMap<String, String> {
        let mut parameters = BTreeMap::new();
        match self {
            Topology::Vanilla => {
                if let Some(datastore_url) = &config.datastore_url {
                    parameters.insert(PARAM_DATASTORE_URL.to_owned(), datastore_url.clone());
                }
            }
            Topology::Supervisor | Topology::Guest { .. } => {
                if let Some(policy) = &config.storage_policy_name {
                    parameters.insert(PARAM_STORAGE_POLICY_NAME.to_owned(), policy.clone());
                }
            }
        }
        parameters
    }

    /// Runs before the first resource is created and requires at least
    /// one node which is ready and schedulable.
    pub async fn before_run(&self, client: &dyn ControlPlane) -> Result<(), WorkflowError> {
        let nodes = client
            .count_ready_schedulable_nodes()
            .await
            .map_err(|source| WorkflowError::FatalSetup {
                resource: String::from("Node list"),
                source,
            })?;
        if nodes == 0 {
            return Err(WorkflowError::NoSchedulableNode);
        }
        info!("Found {} ready and schedulable node(s)", nodes);
        Ok(())
    }

    /// Runs after all teardowns of the workflow.
    pub async fn after_run(&self, quota: &dyn QuotaClient, namespace: &str) -> ClientResult<()> {
        match self {
            Topology::Vanilla => Ok(()),
            Topology::Supervisor => {
                info!("Deleting the storage quota of namespace [{}]", namespace);
                quota.delete_storage_quota(namespace).await
            }
            Topology::Guest {
                supervisor_namespace,
            } => {
                info!(
                    "Resetting the storage quota of supervisor namespace [{}] to {}",
                    supervisor_namespace, DEFAULT_STORAGE_QUOTA
                );
                quota
                    .set_storage_quota(supervisor_namespace, DEFAULT_STORAGE_QUOTA)
                    .await
            }
        }
    }
}
