//! The snapshot lifecycle workflow
//!
//! The workflow provisions a volume, takes a snapshot of it, deletes the
//! snapshot again and verifies that the snapshot content follows the
//! deletion policy of its class. Every created resource is removed again,
//! whichever way the run ends.

use super::config::WorkflowConfig;
use super::error::{RunFailure, WorkflowError};
use crate::test::assertions::{self, AssertionFailure};
use crate::test::client::{
    quantity_to_mib, ClaimPhase, ClientResult, ControlPlane, DeletionPolicy, QuotaClient,
    ResourceRef, SnapshotClassSpec, SnapshotContentRef, SnapshotSpec, StorageClassSpec,
    VolumeBackend, VolumeClaimSpec,
};
use crate::test::kube::with_unique_suffix;
use crate::test::teardown::{Teardown, TeardownError, TeardownScope};
use crate::test::wait::{wait_until, Check};
use futures::future::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// States of the workflow in the order they are reached
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum WorkflowState {
    Init,
    ClassCreated,
    ClaimCreated,
    ClaimBound,
    VolumeHandleResolved,
    SnapshotClassCreated,
    SnapshotCreated,
    ContentAutoCreated,
    SnapshotDeleted,
    ContentDeletionVerified,
    Done,
}

impl WorkflowState {
    /// Describes the step which leaves this state.
    pub fn next_step(&self) -> &'static str {
        match self {
            WorkflowState::Init => "create storage class",
            WorkflowState::ClassCreated => "create volume claim",
            WorkflowState::ClaimCreated => "provision volume",
            WorkflowState::ClaimBound => "resolve volume handle",
            WorkflowState::VolumeHandleResolved => "create snapshot class",
            WorkflowState::SnapshotClassCreated => "create snapshot",
            WorkflowState::SnapshotCreated => "await snapshot content",
            WorkflowState::ContentAutoCreated => "delete snapshot",
            WorkflowState::SnapshotDeleted => "verify snapshot content deletion policy",
            WorkflowState::ContentDeletionVerified => "finish",
            WorkflowState::Done => "teardown",
        }
    }
}

/// Names of the resources of one run
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceNames {
    pub storage_class: String,
    pub claim: String,
    pub snapshot_class: String,
    pub snapshot: String,
}

impl ResourceNames {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let name = |base: &str| {
            if config.unique_names {
                with_unique_suffix(base)
            } else {
                base.to_owned()
            }
        };
        ResourceNames {
            storage_class: name(&config.storage_class_name),
            claim: name(&config.claim_name),
            snapshot_class: name(&config.snapshot_class_name),
            snapshot: name(&config.snapshot_name),
        }
    }
}

/// Outcome of a successful run
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowReport {
    pub state: WorkflowState,
    pub names: ResourceNames,
    pub volume_id: Option<String>,
    pub snapshot_content: Option<String>,
}

/// Drives one run of the snapshot workflow
pub struct SnapshotWorkflow<'a> {
    client: &'a dyn ControlPlane,
    backend: &'a dyn VolumeBackend,
    quota: &'a dyn QuotaClient,
    config: &'a WorkflowConfig,
    names: ResourceNames,
    cancel: CancellationToken,
    state: WorkflowState,
    volume_id: Option<String>,
    content: Option<SnapshotContentRef>,
}

impl<'a> SnapshotWorkflow<'a> {
    pub fn new(
        client: &'a dyn ControlPlane,
        backend: &'a dyn VolumeBackend,
        quota: &'a dyn QuotaClient,
        config: &'a WorkflowConfig,
    ) -> Self {
        SnapshotWorkflow {
            client,
            backend,
            quota,
            config,
            names: ResourceNames::from_config(config),
            cancel: CancellationToken::new(),
            state: WorkflowState::Init,
            volume_id: None,
            content: None,
        }
    }

    /// Uses the given token to cancel the run from the outside.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Runs all steps and afterwards the teardowns of every resource which
    /// was created, also if a step failed, the run was cancelled or
    /// panicked.
    pub async fn run(mut self) -> Result<WorkflowReport, RunFailure> {
        info!(
            "Starting snapshot workflow in namespace [{}] on a {:?} cluster",
            self.config.namespace, self.config.topology
        );

        if let Err(error) = self.config.topology.before_run(self.client).await {
            return Err(RunFailure {
                state: WorkflowState::Init,
                step: "check nodes",
                error,
                teardown_errors: Vec::new(),
            });
        }

        let mut scope = TeardownScope::new();
        // Steps observe the run deadline, teardowns only the caller's token.
        let run_cancel = self.cancel.child_token();
        let run_deadline = self.config.timeouts.run_deadline;
        let deadline_timer = run_deadline.map(|deadline| {
            let expired = run_cancel.clone();
            tokio::spawn(async move {
                time::sleep(deadline).await;
                expired.cancel();
            })
        });

        let outcome = AssertUnwindSafe(self.execute(&mut scope, &run_cancel))
            .catch_unwind()
            .await;
        if let Some(timer) = deadline_timer {
            timer.abort();
        }
        let result = match outcome {
            Ok(Err(WorkflowError::Cancelled { .. }))
                if run_cancel.is_cancelled() && !self.cancel.is_cancelled() =>
            {
                Err(WorkflowError::DeadlineExceeded(run_deadline.unwrap_or_default()))
            }
            Ok(result) => result,
            Err(panic) => Err(WorkflowError::Panicked(panic_message(&*panic))),
        };

        if let Err(error) = &result {
            error!(
                "Step [{}] failed in state [{:?}]: {}",
                self.state.next_step(),
                self.state,
                error
            );
        }

        let mut teardown_errors = scope.run_teardowns().await;
        if let Err(source) = self
            .config
            .topology
            .after_run(self.quota, &self.config.namespace)
            .await
        {
            teardown_errors.push(TeardownError {
                label: format!("{:?} topology hook", self.config.topology),
                source: source.into(),
            });
        }

        match result {
            Ok(()) if teardown_errors.is_empty() => {
                info!("Snapshot workflow finished successfully");
                Ok(WorkflowReport {
                    state: self.state,
                    names: self.names,
                    volume_id: self.volume_id,
                    snapshot_content: self.content.map(|content| content.resource.name),
                })
            }
            Ok(()) => Err(RunFailure {
                state: self.state,
                step: self.state.next_step(),
                error: WorkflowError::TeardownFailed(teardown_errors.len()),
                teardown_errors,
            }),
            Err(error) => Err(RunFailure {
                state: self.state,
                step: self.state.next_step(),
                error,
                teardown_errors,
            }),
        }
    }

    fn advance(&mut self, state: WorkflowState) {
        info!("Snapshot workflow: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Fails with [`WorkflowError::Cancelled`] if the run was cancelled.
    /// Creations and deletions are never interrupted, so this is checked
    /// before each of them.
    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), WorkflowError> {
        if cancel.is_cancelled() {
            Err(WorkflowError::Cancelled {
                resource: format!("step [{}]", self.state.next_step()),
            })
        } else {
            Ok(())
        }
    }

    async fn execute(
        &mut self,
        scope: &mut TeardownScope<'a>,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let client = self.client;
        let backend = self.backend;
        let config = self.config;
        let timeouts = &config.timeouts;

        let storage_class_spec = StorageClassSpec {
            name: self.names.storage_class.clone(),
            provisioner: config.provisioner.clone(),
            parameters: config.effective_storage_class_parameters(),
        };
        self.checkpoint(cancel)?;
        let (storage_class, _) = scope
            .create(client.create_storage_class(&storage_class_spec), |created| {
                delete_teardown(client, created)
            })
            .await
            .map_err(|source| WorkflowError::FatalSetup {
                resource: format!("StorageClass/{}", storage_class_spec.name),
                source,
            })?;
        self.advance(WorkflowState::ClassCreated);

        let claim_spec = VolumeClaimSpec {
            name: self.names.claim.clone(),
            namespace: config.namespace.clone(),
            size: config.claim_size.clone(),
            storage_class: config
                .claim_storage_class
                .clone()
                .unwrap_or_else(|| storage_class.name.clone()),
        };
        self.checkpoint(cancel)?;
        let (claim, claim_ticket) = scope
            .create(client.create_volume_claim(&claim_spec), |created| {
                delete_teardown(client, created)
            })
            .await
            .map_err(|source| WorkflowError::FatalSetup {
                resource: format!(
                    "PersistentVolumeClaim/{}/{}",
                    claim_spec.namespace, claim_spec.name
                ),
                source,
            })?;
        self.advance(WorkflowState::ClaimCreated);

        wait_until(
            &claim.to_string(),
            &timeouts.claim_bound(),
            cancel,
            || claim_bound(client, &claim),
        )
        .await?;
        self.advance(WorkflowState::ClaimBound);

        let volume_id = client
            .get_bound_volume_identifier(&claim)
            .await?
            .unwrap_or_default();
        assertions::non_empty_identifier(&claim, "volumeHandle", &volume_id)?;
        self.volume_id = Some(volume_id.clone());
        scope.and_then(
            claim_ticket,
            volume_deleted_teardown(backend, volume_id.clone(), config, self.cancel.clone()),
        );
        self.advance(WorkflowState::VolumeHandleResolved);

        if config.verify_capacity {
            let requested = quantity_to_mib(&config.claim_size).ok_or_else(|| {
                AssertionFailure::new(
                    &claim,
                    "capacity",
                    "a valid quantity",
                    config.claim_size.clone(),
                )
            })?;
            let provisioned = backend.provisioned_capacity_mib(&volume_id).await?;
            assertions::capacity_matches(format!("volume {}", volume_id), requested, provisioned)?;
        }

        let snapshot_class_spec = SnapshotClassSpec {
            name: self.names.snapshot_class.clone(),
            driver: config.snapshot_driver.clone(),
            deletion_policy: config.deletion_policy,
        };
        self.checkpoint(cancel)?;
        let (snapshot_class, _) = scope
            .create(client.create_snapshot_class(&snapshot_class_spec), |created| {
                delete_teardown(client, created)
            })
            .await
            .map_err(|source| WorkflowError::FatalSetup {
                resource: format!("VolumeSnapshotClass/{}", snapshot_class_spec.name),
                source,
            })?;
        self.advance(WorkflowState::SnapshotClassCreated);

        let snapshot_spec = SnapshotSpec {
            name: self.names.snapshot.clone(),
            namespace: config.namespace.clone(),
            source_claim: claim.name.clone(),
            snapshot_class: snapshot_class.name.clone(),
        };
        self.checkpoint(cancel)?;
        let (snapshot, _) = scope
            .create(client.create_snapshot(&snapshot_spec), |created| {
                delete_teardown(client, created)
            })
            .await
            .map_err(|source| WorkflowError::FatalSetup {
                resource: format!(
                    "VolumeSnapshot/{}/{}",
                    snapshot_spec.namespace, snapshot_spec.name
                ),
                source,
            })?;
        self.advance(WorkflowState::SnapshotCreated);

        wait_until(
            &snapshot.to_string(),
            &timeouts.snapshot_ready(),
            cancel,
            || snapshot_ready(client, &snapshot),
        )
        .await?;
        let content = match client.get_snapshot_content_for(&snapshot).await? {
            Some(content) => content,
            None => {
                return Err(AssertionFailure::new(
                    &snapshot,
                    "boundVolumeSnapshotContentName",
                    "a bound snapshot content",
                    "none",
                )
                .into())
            }
        };
        assertions::field_equals(
            &content.resource,
            "volumeSnapshotRef",
            &Some((config.namespace.clone(), snapshot.name.clone())),
            &content.bound_snapshot,
        )?;
        // Also removes the content if it outlives its snapshot by mistake.
        scope.register(delete_teardown(client, &content.resource));
        self.content = Some(content.clone());
        self.advance(WorkflowState::ContentAutoCreated);

        self.checkpoint(cancel)?;
        client.delete(&snapshot).await?;
        wait_until(
            &snapshot.to_string(),
            &timeouts.content_deleted(),
            cancel,
            || absent(client, &snapshot),
        )
        .await?;
        assertions::absent(&snapshot, client.exists(&snapshot).await?)?;
        self.advance(WorkflowState::SnapshotDeleted);

        match config.deletion_policy {
            DeletionPolicy::Delete => {
                wait_until(
                    &content.resource.to_string(),
                    &timeouts.content_deleted(),
                    cancel,
                    || absent(client, &content.resource),
                )
                .await?;
            }
            DeletionPolicy::Retain => {
                assertions::exists(&content.resource, client.exists(&content.resource).await?)?;
            }
        }
        self.advance(WorkflowState::ContentDeletionVerified);

        self.advance(WorkflowState::Done);
        Ok(())
    }
}

fn delete_teardown<'a>(client: &'a dyn ControlPlane, resource: &ResourceRef) -> Teardown<'a> {
    let resource = resource.clone();
    Teardown::new(format!("delete {}", resource), async move {
        client.delete(&resource).await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn volume_deleted_teardown<'a>(
    backend: &'a dyn VolumeBackend,
    volume_id: String,
    config: &WorkflowConfig,
    cancel: CancellationToken,
) -> Teardown<'a> {
    let policy = config.timeouts.volume_deleted();
    Teardown::new(
        format!("verify deletion of volume {}", volume_id),
        async move {
            wait_until(
                &format!("volume {}", volume_id),
                &policy,
                &cancel,
                || volume_deleted(backend, &volume_id),
            )
            .await?;
            Ok::<_, anyhow::Error>(())
        },
    )
}

async fn claim_bound(client: &dyn ControlPlane, claim: &ResourceRef) -> ClientResult<Check<()>> {
    let phase = client.get_volume_claim_phase(claim).await?;
    match assertions::phase_equals(claim, &ClaimPhase::Bound, &phase) {
        Ok(()) => Ok(Check::Satisfied(())),
        Err(failure) => Ok(Check::Unsatisfied(format!("phase {}", failure.observed))),
    }
}

async fn snapshot_ready(
    client: &dyn ControlPlane,
    snapshot: &ResourceRef,
) -> ClientResult<Check<()>> {
    if client.get_snapshot_ready(snapshot).await? {
        Ok(Check::Satisfied(()))
    } else {
        Ok(Check::Unsatisfied(String::from("readyToUse false")))
    }
}

async fn absent(client: &dyn ControlPlane, resource: &ResourceRef) -> ClientResult<Check<()>> {
    if client.exists(resource).await? {
        Ok(Check::Unsatisfied(String::from("present")))
    } else {
        Ok(Check::Satisfied(()))
    }
}

async fn volume_deleted(backend: &dyn VolumeBackend, volume_id: &str) -> ClientResult<Check<()>> {
    if backend.is_volume_physically_deleted(volume_id).await? {
        Ok(Check::Satisfied(()))
    } else {
        Ok(Check::Unsatisfied(String::from("backing object present")))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}
