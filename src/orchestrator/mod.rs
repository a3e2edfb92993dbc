//! Orchestrator adapter
//!
//! The control plane never talks to a cluster API directly; everything goes
//! through the `Orchestrator` trait, which exposes services, secrets, and
//! configs at the intent level. Production deployments implement it over the
//! cluster client of their platform; tests use [`memory::MemoryOrchestrator`].

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Interval between task-state polls in [`Orchestrator::wait_for_state`].
pub const STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One secret or config entry as stored by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Cluster-assigned entry id.
    pub id: String,
    /// Entry name, unique within its store.
    pub name: String,
    /// Entry payload, verbatim.
    pub data: Vec<u8>,
    /// Entry labels.
    pub labels: HashMap<String, String>,
}

impl StoreEntry {
    /// Label lookup.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Reference from a service spec to a mounted secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub secret_id: String,
    pub secret_name: String,
    /// Mount target; file name under the secret mount root.
    pub target: String,
    /// File mode of the mounted secret.
    pub mode: u32,
}

impl SecretRef {
    /// Reference a secret mounted read-only for owner and group.
    pub fn new(
        secret_id: impl Into<String>,
        secret_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_name: secret_name.into(),
            target: target.into(),
            mode: 0o440,
        }
    }
}

/// Published-port behaviour of a service endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortMode {
    #[default]
    Ingress,
    Host,
}

/// One published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub published: u16,
    pub target: u16,
}

/// Endpoint specification for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub mode: PortMode,
    pub ports: Vec<PortMapping>,
}

/// Replication mode for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    Global,
}

/// Everything needed to create or update a service.
#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub networks: Vec<String>,
    pub secrets: Vec<SecretRef>,
    pub mounts: Vec<String>,
    pub constraints: Vec<String>,
    pub labels: HashMap<String, String>,
    pub endpoint: Option<EndpointSpec>,
    pub mode: Option<ServiceMode>,
    /// `(strategy, descriptor)` placement preferences.
    pub placement_preferences: Vec<(String, String)>,
    pub max_replicas: Option<u64>,
}

/// Observed state of one service, as reported by the cluster.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Secrets currently mounted into the service.
    pub secrets: Vec<SecretRef>,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Starting,
    Running,
    Complete,
    Failed,
    Shutdown,
    Rejected,
    Orphaned,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::New => "new",
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Preparing => "preparing",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
            TaskState::Shutdown => "shutdown",
            TaskState::Rejected => "rejected",
            TaskState::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One task of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub state: TaskState,
    pub desired_state: TaskState,
}

/// Intent-level interface over the cluster API.
///
/// Required methods map one-to-one onto cluster calls. The provided
/// `write_secret`/`write_config` methods implement delete-then-create
/// semantics: the underlying stores are immutable per entry, so reuse of a
/// name is always a replacement.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List services carrying the given label key. Never partial: an error
    /// here is fatal to the current reconcile pass.
    async fn list_labelled_services(&self, label: &str) -> Result<Vec<ServiceInfo>>;

    /// Look up a service by name.
    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>>;

    /// Create the service if absent, update it in place otherwise.
    async fn ensure_service(&self, spec: ServiceSpec) -> Result<ServiceInfo>;

    /// Remove a service. Returns whether it existed.
    async fn remove_service(&self, name: &str) -> Result<bool>;

    /// Current tasks of a service.
    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskInfo>>;

    async fn get_secret(&self, name: &str) -> Result<Option<StoreEntry>>;
    async fn create_secret(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry>;
    /// Remove a secret. Returns whether it existed. Idempotent.
    async fn delete_secret(&self, name: &str) -> Result<bool>;
    async fn list_secrets(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>>;

    async fn get_config(&self, name: &str) -> Result<Option<StoreEntry>>;
    async fn create_config(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry>;
    /// Remove a config. Returns whether it existed. Idempotent.
    async fn delete_config(&self, name: &str) -> Result<bool>;
    async fn list_configs(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>>;

    /// Replace a secret: delete any entry by this name, then create it.
    /// Callers must not race on the same name.
    async fn write_secret(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        let existed = self.delete_secret(name).await?;
        if existed {
            tracing::debug!("Replaced existing secret {}", name);
        }
        self.create_secret(name, data, labels).await
    }

    /// Replace a config: delete any entry by this name, then create it.
    /// Callers must not race on the same name.
    async fn write_config(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        let existed = self.delete_config(name).await?;
        if existed {
            tracing::debug!("Replaced existing config {}", name);
        }
        self.create_config(name, data, labels).await
    }

    /// Poll a service's tasks until the set of live task states converges to
    /// exactly `{desired}` (true), or any state in `invalid` appears (false).
    /// Tasks whose desired state is `shutdown` are ignored. No timeout.
    async fn wait_for_state(
        &self,
        service_name: &str,
        desired: TaskState,
        invalid: &[TaskState],
    ) -> Result<bool> {
        tracing::info!("Waiting for {} state {}", service_name, desired);
        loop {
            tokio::time::sleep(STATE_POLL_INTERVAL).await;

            let tasks = self.service_tasks(service_name).await?;
            let states: std::collections::HashSet<TaskState> = tasks
                .iter()
                .filter(|task| task.desired_state != TaskState::Shutdown)
                .map(|task| task.state)
                .collect();

            tracing::debug!("Current states of {}: {:?}", service_name, states);

            for state in invalid {
                if states.contains(state) {
                    tracing::info!("Invalid state {} detected in {:?}", state, states);
                    return Ok(false);
                }
            }

            if states.len() == 1 && states.contains(&desired) {
                tracing::info!("States of {} converged to {}", service_name, desired);
                return Ok(true);
            }
        }
    }
}

/// Blanket implementation for `Arc<T>` so adapters can be shared cheaply.
#[async_trait]
impl<T: Orchestrator + ?Sized> Orchestrator for std::sync::Arc<T> {
    async fn list_labelled_services(&self, label: &str) -> Result<Vec<ServiceInfo>> {
        (**self).list_labelled_services(label).await
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>> {
        (**self).get_service(name).await
    }

    async fn ensure_service(&self, spec: ServiceSpec) -> Result<ServiceInfo> {
        (**self).ensure_service(spec).await
    }

    async fn remove_service(&self, name: &str) -> Result<bool> {
        (**self).remove_service(name).await
    }

    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskInfo>> {
        (**self).service_tasks(name).await
    }

    async fn get_secret(&self, name: &str) -> Result<Option<StoreEntry>> {
        (**self).get_secret(name).await
    }

    async fn create_secret(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        (**self).create_secret(name, data, labels).await
    }

    async fn delete_secret(&self, name: &str) -> Result<bool> {
        (**self).delete_secret(name).await
    }

    async fn list_secrets(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>> {
        (**self).list_secrets(prefix).await
    }

    async fn get_config(&self, name: &str) -> Result<Option<StoreEntry>> {
        (**self).get_config(name).await
    }

    async fn create_config(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        (**self).create_config(name, data, labels).await
    }

    async fn delete_config(&self, name: &str) -> Result<bool> {
        (**self).delete_config(name).await
    }

    async fn list_configs(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>> {
        (**self).list_configs(prefix).await
    }

    async fn write_secret(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        (**self).write_secret(name, data, labels).await
    }

    async fn write_config(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        (**self).write_config(name, data, labels).await
    }

    async fn wait_for_state(
        &self,
        service_name: &str,
        desired: TaskState,
        invalid: &[TaskState],
    ) -> Result<bool> {
        (**self).wait_for_state(service_name, desired, invalid).await
    }
}

pub use memory::MemoryOrchestrator;
