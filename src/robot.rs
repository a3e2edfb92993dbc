//! Observe-and-renew worker.
//!
//! Runs as its own workload with the account secret mounted. Every tick it
//! classifies ingress services by certificate need and drives one ACME
//! issuance per service, all services concurrently. The HTTP-01 responder
//! runs alongside the observe loop in the same process.

use crate::acme::{AcmeAgent, AcmeClient};
use crate::challenge::ChallengeServer;
use crate::config::ConfigRoot;
use crate::crypto::Crypto;
use crate::error::{IngressError, Result};
use crate::names::Namespace;
use crate::orchestrator::Orchestrator;
use crate::service::{ingress_services, ServiceView};
use futures::future::join_all;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Sleep between observe ticks.
pub const OBSERVE_INTERVAL: Duration = Duration::from_secs(10);

/// The robot's process role, given as its single positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotRole {
    EnsureAccount,
    ObserveAndObey,
}

impl FromStr for RobotRole {
    type Err = IngressError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ensure-account" => Ok(RobotRole::EnsureAccount),
            "observe-and-obey" => Ok(RobotRole::ObserveAndObey),
            _ => Err(IngressError::validation(format!(
                "unknown robot role: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RobotRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            RobotRole::EnsureAccount => "ensure-account",
            RobotRole::ObserveAndObey => "observe-and-obey",
        };
        write!(f, "{}", role)
    }
}

/// Why a service needs an issuance this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertNeed {
    /// No usable key/cert pair exists yet.
    New,
    /// The current certificate expires within the renewal window.
    Renew,
}

impl std::fmt::Display for CertNeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertNeed::New => write!(f, "new"),
            CertNeed::Renew => write!(f, "renew"),
        }
    }
}

/// The observe worker.
pub struct Robot {
    orchestrator: Arc<dyn Orchestrator>,
    acme: Arc<dyn AcmeClient>,
    agent: AcmeAgent,
    names: Namespace,
    cluster: ConfigRoot,
    account_path: PathBuf,
}

impl Robot {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        acme: Arc<dyn AcmeClient>,
        crypto: Arc<dyn Crypto>,
        names: Namespace,
        cluster: ConfigRoot,
    ) -> Self {
        let agent = AcmeAgent::new(
            orchestrator.clone(),
            acme.clone(),
            crypto,
            names.clone(),
        );
        let account_path = names.account_secret_path();
        Self {
            orchestrator,
            acme,
            agent,
            names,
            cluster,
            account_path,
        }
    }

    /// Override where the mounted account secret is read from.
    pub fn with_account_path(mut self, path: PathBuf) -> Self {
        self.account_path = path;
        self
    }

    /// Try to load the account from the mounted secret. False when the file
    /// is missing or the blob does not parse.
    pub async fn load_account(&self) -> Result<bool> {
        let data = match tokio::fs::read(&self.account_path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(
                    "Could not read account secret at {}: {}",
                    self.account_path.display(),
                    e
                );
                return Ok(false);
            }
        };

        match self.acme.load_account(&data).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!("Account secret did not load: {}", e);
                Ok(false)
            }
        }
    }

    /// Load the account, or register a new one and persist it as the
    /// account secret.
    pub async fn ensure_account(&self) -> Result<()> {
        if self.load_account().await? {
            return Ok(());
        }

        tracing::info!("Registering new ACME account for {}", self.cluster.acme.email);
        self.acme
            .create_account(&self.cluster.acme.email, self.cluster.acme.accept_tos)
            .await?;

        let blob = self.acme.save_account().await?;
        self.orchestrator
            .write_secret(&self.names.account_secret(), &blob, Default::default())
            .await?;
        Ok(())
    }

    /// Classify one service's certificate need, if any.
    pub async fn service_needs(view: &ServiceView) -> Result<Option<CertNeed>> {
        if view.latest_cert_pair().await?.is_none() {
            return Ok(Some(CertNeed::New));
        }
        if view.cert_renewable().await? {
            return Ok(Some(CertNeed::Renew));
        }
        Ok(None)
    }

    /// One tick: find services needing certificates and run their orders
    /// concurrently. A failed order never blocks the other services.
    pub async fn observe(&self) -> Result<()> {
        tracing::info!("Observe");

        let views = ingress_services(self.orchestrator.clone(), &self.names).await?;

        let mut pending = Vec::new();
        for view in views.into_iter().filter(ServiceView::acme_ssl) {
            match Self::service_needs(&view).await {
                Ok(Some(need)) => {
                    tracing::info!("Service {} needs certificate: {}", view.name(), need);
                    pending.push(view);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping service {}: {}", view.name(), e),
            }
        }

        let results = join_all(
            pending
                .iter()
                .map(|view| self.agent.order_certificate(view)),
        )
        .await;

        for (view, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!("Certificate order for {} failed: {}", view.name(), e);
            }
        }

        tracing::info!("Observe done");
        Ok(())
    }

    async fn observe_loop(&self) {
        loop {
            if let Err(e) = self.observe().await {
                tracing::warn!("Observe tick failed: {}", e);
            }
            tokio::time::sleep(OBSERVE_INTERVAL).await;
        }
    }

    /// Load the account, then run the observe loop with the embedded
    /// challenge responder until either dies.
    pub async fn observe_and_obey(&self) -> Result<()> {
        if !self.load_account().await? {
            return Err(IngressError::acme("could not load ACME account"));
        }

        let responder = ChallengeServer::new(self.orchestrator.clone(), self.names.clone());

        tokio::select! {
            result = responder.serve_default() => result,
            _ = self.observe_loop() => Ok(()),
        }
    }

    /// Entry point for the robot process.
    pub async fn run(&self, role: RobotRole) -> Result<()> {
        tracing::info!("Booting ingress robot, role {}", role);
        match role {
            RobotRole::EnsureAccount => self.ensure_account().await,
            RobotRole::ObserveAndObey => self.observe_and_obey().await,
        }
    }
}
