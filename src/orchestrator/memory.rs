//! In-memory orchestrator for tests and ephemeral usage.

use super::{Orchestrator, ServiceInfo, ServiceSpec, StoreEntry, TaskInfo, TaskState};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct ClusterState {
    secrets: HashMap<String, StoreEntry>,
    configs: HashMap<String, StoreEntry>,
    services: HashMap<String, ServiceRecord>,
}

#[derive(Debug, Clone)]
struct ServiceRecord {
    info: ServiceInfo,
    tasks: Vec<TaskInfo>,
}

/// An orchestrator backed by process memory.
///
/// Services ensured through the API converge immediately: their task set
/// becomes a single task in the configured state (default `running`), so
/// `wait_for_state` terminates on its first poll. Externally-managed
/// application services are injected with [`register_service`].
///
/// Every mutation is appended to a shared journal, which tests use to assert
/// operation ordering.
///
/// [`register_service`]: MemoryOrchestrator::register_service
#[derive(Clone, Default)]
pub struct MemoryOrchestrator {
    state: Arc<RwLock<ClusterState>>,
    next_id: Arc<AtomicU64>,
    converged: Arc<RwLock<HashMap<String, TaskState>>>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, kind: &str) -> String {
        format!("{}{}", kind, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    /// Shared operation journal. Entries look like `create_secret ndi.acct`.
    pub fn journal(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.journal)
    }

    /// Inject an externally-managed service, e.g. an application workload
    /// carrying ingress labels. Returns its assigned id.
    pub async fn register_service(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> String {
        let id = self.next_id("srv");
        let record = ServiceRecord {
            info: ServiceInfo {
                id: id.clone(),
                name: name.to_string(),
                labels,
                secrets: Vec::new(),
            },
            tasks: vec![TaskInfo {
                state: TaskState::Running,
                desired_state: TaskState::Running,
            }],
        };
        self.state
            .write()
            .await
            .services
            .insert(name.to_string(), record);
        id
    }

    /// Configure the task state services converge to after `ensure_service`.
    pub async fn set_converged_state(&self, service_name: &str, state: TaskState) {
        self.converged
            .write()
            .await
            .insert(service_name.to_string(), state);
    }

    /// Override the task set of a service.
    pub async fn set_tasks(&self, service_name: &str, tasks: Vec<TaskInfo>) {
        if let Some(record) = self.state.write().await.services.get_mut(service_name) {
            record.tasks = tasks;
        }
    }

    fn list_prefixed(map: &HashMap<String, StoreEntry>, prefix: Option<&str>) -> Vec<StoreEntry> {
        let mut entries: Vec<StoreEntry> = map
            .values()
            .filter(|entry| prefix.map_or(true, |p| entry.name.starts_with(p)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

#[async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn list_labelled_services(&self, label: &str) -> Result<Vec<ServiceInfo>> {
        let state = self.state.read().await;
        let mut services: Vec<ServiceInfo> = state
            .services
            .values()
            .filter(|record| record.info.labels.contains_key(label))
            .map(|record| record.info.clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>> {
        let state = self.state.read().await;
        Ok(state.services.get(name).map(|record| record.info.clone()))
    }

    async fn ensure_service(&self, spec: ServiceSpec) -> Result<ServiceInfo> {
        let converged = self
            .converged
            .read()
            .await
            .get(&spec.name)
            .copied()
            .unwrap_or(TaskState::Running);

        let mut state = self.state.write().await;
        let id = state
            .services
            .get(&spec.name)
            .map(|record| record.info.id.clone())
            .unwrap_or_else(|| self.next_id("srv"));

        let info = ServiceInfo {
            id,
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            secrets: spec.secrets.clone(),
        };
        let record = ServiceRecord {
            info: info.clone(),
            tasks: vec![TaskInfo {
                state: converged,
                desired_state: TaskState::Running,
            }],
        };
        state.services.insert(spec.name.clone(), record);
        self.record(format!("ensure_service {}", spec.name));
        Ok(info)
    }

    async fn remove_service(&self, name: &str) -> Result<bool> {
        let existed = self.state.write().await.services.remove(name).is_some();
        if existed {
            self.record(format!("remove_service {}", name));
        }
        Ok(existed)
    }

    async fn service_tasks(&self, name: &str) -> Result<Vec<TaskInfo>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .get(name)
            .map(|record| record.tasks.clone())
            .unwrap_or_default())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<StoreEntry>> {
        Ok(self.state.read().await.secrets.get(name).cloned())
    }

    async fn create_secret(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        let entry = StoreEntry {
            id: self.next_id("sec"),
            name: name.to_string(),
            data: data.to_vec(),
            labels,
        };
        self.state
            .write()
            .await
            .secrets
            .insert(name.to_string(), entry.clone());
        self.record(format!("create_secret {}", name));
        Ok(entry)
    }

    async fn delete_secret(&self, name: &str) -> Result<bool> {
        let existed = self.state.write().await.secrets.remove(name).is_some();
        if existed {
            self.record(format!("delete_secret {}", name));
        }
        Ok(existed)
    }

    async fn list_secrets(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>> {
        Ok(Self::list_prefixed(
            &self.state.read().await.secrets,
            prefix,
        ))
    }

    async fn get_config(&self, name: &str) -> Result<Option<StoreEntry>> {
        Ok(self.state.read().await.configs.get(name).cloned())
    }

    async fn create_config(
        &self,
        name: &str,
        data: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<StoreEntry> {
        let entry = StoreEntry {
            id: self.next_id("cfg"),
            name: name.to_string(),
            data: data.to_vec(),
            labels,
        };
        self.state
            .write()
            .await
            .configs
            .insert(name.to_string(), entry.clone());
        self.record(format!("create_config {}", name));
        Ok(entry)
    }

    async fn delete_config(&self, name: &str) -> Result<bool> {
        let existed = self.state.write().await.configs.remove(name).is_some();
        if existed {
            self.record(format!("delete_config {}", name));
        }
        Ok(existed)
    }

    async fn list_configs(&self, prefix: Option<&str>) -> Result<Vec<StoreEntry>> {
        Ok(Self::list_prefixed(
            &self.state.read().await.configs,
            prefix,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_secret_replaces() {
        let orchestrator = MemoryOrchestrator::new();
        orchestrator
            .write_secret("a", b"one", HashMap::new())
            .await
            .unwrap();
        orchestrator
            .write_secret("a", b"two", HashMap::new())
            .await
            .unwrap();

        let entries = orchestrator.list_secrets(Some("a")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, b"two");
    }

    #[tokio::test]
    async fn test_list_prefix_filter() {
        let orchestrator = MemoryOrchestrator::new();
        orchestrator
            .create_config("ndi.challange.x", b"1", HashMap::new())
            .await
            .unwrap();
        orchestrator
            .create_config("other.entry", b"2", HashMap::new())
            .await
            .unwrap();

        let entries = orchestrator
            .list_configs(Some("ndi.challange."))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ndi.challange.x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_reports_invalid_state() {
        let orchestrator = MemoryOrchestrator::new();
        orchestrator.register_service("svc", HashMap::new()).await;
        orchestrator
            .set_tasks(
                "svc",
                vec![
                    TaskInfo {
                        state: TaskState::Running,
                        desired_state: TaskState::Running,
                    },
                    TaskInfo {
                        state: TaskState::Failed,
                        desired_state: TaskState::Running,
                    },
                ],
            )
            .await;

        let converged = orchestrator
            .wait_for_state("svc", TaskState::Running, &[TaskState::Failed])
            .await
            .unwrap();
        assert!(!converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_ignores_shutdown_tasks() {
        let orchestrator = MemoryOrchestrator::new();
        orchestrator.register_service("svc", HashMap::new()).await;
        orchestrator
            .set_tasks(
                "svc",
                vec![
                    TaskInfo {
                        state: TaskState::Running,
                        desired_state: TaskState::Running,
                    },
                    // A task being drained does not block convergence.
                    TaskInfo {
                        state: TaskState::Failed,
                        desired_state: TaskState::Shutdown,
                    },
                ],
            )
            .await;

        let converged = orchestrator
            .wait_for_state("svc", TaskState::Running, &[TaskState::Failed])
            .await
            .unwrap();
        assert!(converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_converges_over_time() {
        let orchestrator = MemoryOrchestrator::new();
        orchestrator.register_service("svc", HashMap::new()).await;
        orchestrator
            .set_tasks(
                "svc",
                vec![TaskInfo {
                    state: TaskState::Starting,
                    desired_state: TaskState::Running,
                }],
            )
            .await;

        let (converged, _) = tokio::join!(
            orchestrator.wait_for_state("svc", TaskState::Running, &[TaskState::Failed]),
            async {
                tokio::time::sleep(std::time::Duration::from_secs(12)).await;
                orchestrator
                    .set_tasks(
                        "svc",
                        vec![TaskInfo {
                            state: TaskState::Running,
                            desired_state: TaskState::Running,
                        }],
                    )
                    .await;
            }
        );
        assert!(converged.unwrap());
    }

    #[tokio::test]
    async fn test_labelled_service_filter() {
        let orchestrator = MemoryOrchestrator::new();
        let mut labels = HashMap::new();
        labels.insert("nginx-ingress.host".to_string(), "a.example.com".to_string());
        orchestrator.register_service("app", labels).await;
        orchestrator
            .register_service("plain", HashMap::new())
            .await;

        let services = orchestrator
            .list_labelled_services("nginx-ingress.host")
            .await
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "app");
    }
}
