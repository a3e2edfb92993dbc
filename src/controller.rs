//! Top-level reconciliation loop.
//!
//! One pass makes sure the ACME account exists, DH parameters are fresh, the
//! observe worker and challenge responder are running, and the reverse proxy
//! is up with the current configuration and certificate secrets mounted.
//! All durable state lives in the cluster's stores; the controller itself
//! can be restarted at any point.

use crate::config::{ConfigRoot, INGRESS_NETWORK};
use crate::crypto::Crypto;
use crate::error::{IngressError, Result};
use crate::names::Namespace;
use crate::orchestrator::{Orchestrator, SecretRef, ServiceSpec, StoreEntry, TaskState};
use crate::render::{ConfigRenderer, RenderedConfig};
use crate::service::{expires_before, ingress_services, ServiceSnapshot, LABEL_EXPIRES};
use crate::store::{StoreKind, VersionedStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Sleep between reconcile passes.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// DH parameter strength for the proxy's TLS config.
pub const DHPARAM_BITS: u32 = 4096;

/// Fresh DH parameters are considered valid this long.
pub const DHPARAM_LIFETIME_SECS: i64 = 28 * 24 * 60 * 60;

/// DH parameters are regenerated once under this much lifetime remains.
pub const DHPARAM_RENEWAL_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Proxy mount point of the rendered configuration.
pub const NGINX_CONF_TARGET: &str = "/etc/nginx/nginx.conf";

/// Proxy mount point of the DH parameters.
pub const DHPARAM_TARGET: &str = "/etc/nginx/ssl-dhparams.pem";

/// Control socket bind for workloads that talk to the cluster API.
const CONTROL_SOCKET_MOUNT: &str = "/var/run/docker.sock:/var/run/docker.sock:rw";

/// Entrypoint arguments of the robot image, per role.
const ROBOT_ENSURE_ACCOUNT: &[&str] = &["robot", "ensure-account"];
const ROBOT_OBSERVE_AND_OBEY: &[&str] = &["robot", "observe-and-obey"];

/// The reconciler.
pub struct Controller {
    orchestrator: Arc<dyn Orchestrator>,
    crypto: Arc<dyn Crypto>,
    renderer: Arc<dyn ConfigRenderer>,
    names: Namespace,
    cluster: ConfigRoot,
}

impl Controller {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        crypto: Arc<dyn Crypto>,
        renderer: Arc<dyn ConfigRenderer>,
        names: Namespace,
        cluster: ConfigRoot,
    ) -> Self {
        Self {
            orchestrator,
            crypto,
            renderer,
            names,
            cluster,
        }
    }

    fn dhparam_store(&self) -> VersionedStore {
        VersionedStore::new(
            self.orchestrator.clone(),
            StoreKind::Secret,
            self.names.dhparam_prefix(),
        )
    }

    /// Make sure the ACME account secret exists, running the bootstrap
    /// workload to create it if necessary.
    pub async fn ensure_account(&self) -> Result<()> {
        tracing::info!("Ensure ACME account exists");

        let account_secret = self.names.account_secret();
        if self.orchestrator.get_secret(&account_secret).await?.is_some() {
            return Ok(());
        }

        let config = &self.cluster.services.account;
        self.orchestrator.remove_service(&config.name).await?;

        self.orchestrator
            .ensure_service(ServiceSpec {
                name: config.name.clone(),
                image: config.image.clone(),
                command: Some(
                    ROBOT_ENSURE_ACCOUNT
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                mounts: vec![CONTROL_SOCKET_MOUNT.to_string()],
                constraints: config.constraints.clone(),
                labels: config.labels.clone(),
                ..ServiceSpec::default()
            })
            .await?;

        let converged = self
            .orchestrator
            .wait_for_state(&config.name, TaskState::Complete, &[TaskState::Failed])
            .await?;

        self.orchestrator.remove_service(&config.name).await?;

        if !converged {
            return Err(IngressError::acme("account bootstrap workload failed"));
        }
        Ok(())
    }

    /// Make sure a DH parameters secret with enough remaining lifetime
    /// exists, generating the next version when it does not.
    pub async fn ensure_dhparams(&self) -> Result<()> {
        tracing::info!("Ensuring dhparams is fresh");

        let store = self.dhparam_store();
        let now = jiff::Timestamp::now().as_second();

        let next_version = match store.latest_version().await? {
            Some((version, entry)) => {
                if !expires_before(&entry, now + DHPARAM_RENEWAL_WINDOW_SECS)? {
                    tracing::info!("Dhparams {} is fresh enough", entry.name);
                    return Ok(());
                }
                version + 1
            }
            None => 0,
        };

        let pem = self.crypto.generate_dhparams(DHPARAM_BITS).await?;
        let expires = now + DHPARAM_LIFETIME_SECS;

        let mut labels = HashMap::new();
        labels.insert(LABEL_EXPIRES.to_string(), expires.to_string());

        tracing::info!("Storing dhparams version {}", next_version);
        self.orchestrator
            .write_secret(&store.name_at(next_version), pem.as_bytes(), labels)
            .await?;
        Ok(())
    }

    /// Recreate the observe worker with the account secret mounted.
    pub async fn ensure_robot(&self) -> Result<()> {
        tracing::info!("Ensure robot");

        let account_secret = self.names.account_secret();
        let account = self
            .orchestrator
            .get_secret(&account_secret)
            .await?
            .ok_or_else(|| IngressError::not_found(format!("secret {}", account_secret)))?;

        let config = &self.cluster.services.robot;
        self.orchestrator.remove_service(&config.name).await?;

        self.orchestrator
            .ensure_service(ServiceSpec {
                name: config.name.clone(),
                image: config.image.clone(),
                command: Some(
                    ROBOT_OBSERVE_AND_OBEY
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                mounts: vec![CONTROL_SOCKET_MOUNT.to_string()],
                secrets: vec![SecretRef::new(
                    account.id.clone(),
                    account.name.clone(),
                    account.name.clone(),
                )],
                constraints: config.constraints.clone(),
                labels: config.labels.clone(),
                ..ServiceSpec::default()
            })
            .await?;
        Ok(())
    }

    /// Recreate the challenge responder on the ingress network.
    pub async fn ensure_challenge(&self) -> Result<()> {
        tracing::info!("Ensure challenge handler");

        let config = &self.cluster.services.challenge;
        self.orchestrator.remove_service(&config.name).await?;

        self.orchestrator
            .ensure_service(ServiceSpec {
                name: config.name.clone(),
                image: config.image.clone(),
                networks: vec![INGRESS_NETWORK.to_string()],
                mounts: vec![CONTROL_SOCKET_MOUNT.to_string()],
                constraints: config.constraints.clone(),
                labels: config.labels.clone(),
                ..ServiceSpec::default()
            })
            .await?;
        Ok(())
    }

    /// Render the proxy configuration and make sure its content-addressed
    /// secret exists. Returns the secret entry and the snapshots it was
    /// rendered from.
    pub async fn ensure_nginx_config(&self) -> Result<(StoreEntry, Vec<ServiceSnapshot>)> {
        let views = ingress_services(self.orchestrator.clone(), &self.names).await?;

        let mut snapshots = Vec::with_capacity(views.len());
        for view in &views {
            match view.snapshot().await {
                Ok(snapshot) => snapshots.push(snapshot),
                // A malformed label set poisons that service only.
                Err(e) => tracing::warn!("Skipping service {}: {}", view.name(), e),
            }
        }

        let proxy_protocol = snapshots
            .iter()
            .any(|snapshot| snapshot.proxy_protocol.is_some());

        tracing::debug!("Generating nginx config for {} services", snapshots.len());
        let rendered = RenderedConfig::new(self.renderer.render(
            &snapshots,
            proxy_protocol,
            &self.cluster,
        )?);

        let secret_name = self.names.conf_secret(&rendered.hash());
        let entry = match self.orchestrator.get_secret(&secret_name).await? {
            Some(entry) => entry,
            None => {
                tracing::info!("Secret {} not found, writing", secret_name);
                self.orchestrator
                    .write_secret(&secret_name, rendered.as_bytes(), HashMap::new())
                    .await?
            }
        };

        Ok((entry, snapshots))
    }

    /// Make sure the reverse proxy runs with the current configuration,
    /// DH parameters, and every service's latest certificate pair mounted.
    pub async fn ensure_nginx_service(&self) -> Result<()> {
        tracing::info!("Ensure nginx service");

        let (conf_entry, snapshots) = self.ensure_nginx_config().await?;

        let mut secrets = vec![SecretRef::new(
            conf_entry.id.clone(),
            conf_entry.name.clone(),
            NGINX_CONF_TARGET,
        )];

        let (_, dhparams) = self
            .dhparam_store()
            .latest_version()
            .await?
            .ok_or_else(|| IngressError::invariant("dhparams secret missing"))?;
        secrets.push(SecretRef::new(
            dhparams.id.clone(),
            dhparams.name.clone(),
            DHPARAM_TARGET,
        ));

        for snapshot in &snapshots {
            if let Some(pair) = &snapshot.cert_pair {
                for entry in [&pair.key, &pair.cert] {
                    secrets.push(SecretRef::new(
                        entry.id.clone(),
                        entry.name.clone(),
                        entry.name.clone(),
                    ));
                }
            }
        }

        let config = &self.cluster.services.nginx;
        self.orchestrator
            .ensure_service(ServiceSpec {
                name: config.name.clone(),
                image: config.image.clone(),
                networks: config.all_networks(),
                secrets,
                constraints: config.constraints.clone(),
                labels: config.labels.clone(),
                endpoint: config.endpoint_spec(),
                mode: Some(config.service_mode()),
                placement_preferences: config
                    .preferences
                    .iter()
                    .map(|preference| preference.as_tuple())
                    .collect(),
                max_replicas: config.maxreplicas,
                ..ServiceSpec::default()
            })
            .await?;

        let converged = self
            .orchestrator
            .wait_for_state(&config.name, TaskState::Running, &[TaskState::Failed])
            .await?;
        if !converged {
            return Err(IngressError::orchestrator(format!(
                "service {} entered failed state",
                config.name
            )));
        }
        Ok(())
    }

    /// Bootstrap, then reconcile the proxy forever. Errors inside the loop
    /// are logged and retried on the next tick; bootstrap errors are fatal.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Booting ingress controller");

        self.ensure_account().await?;
        self.ensure_dhparams().await?;
        self.ensure_robot().await?;
        self.ensure_challenge().await?;

        loop {
            if let Err(e) = self.ensure_nginx_service().await {
                tracing::warn!("Reconcile pass failed, retrying next tick: {}", e);
            }
            tokio::time::sleep(RECONCILE_INTERVAL).await;
        }
    }
}
