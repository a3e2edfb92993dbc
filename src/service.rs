//! Projection of one ingress-managed application service.
//!
//! Application workloads opt into ingress by attaching `nginx-ingress.*`
//! labels. [`ServiceView`] parses those labels and binds the service's
//! versioned key/cert secret families.

use crate::error::{IngressError, Result};
use crate::names::Namespace;
use crate::orchestrator::{Orchestrator, ServiceInfo, StoreEntry};
use crate::store::{StoreKind, VersionedStore};
use std::collections::HashMap;
use std::sync::Arc;

pub const LABEL_HOST: &str = "nginx-ingress.host";
pub const LABEL_PORT: &str = "nginx-ingress.port";
pub const LABEL_PATH: &str = "nginx-ingress.path";
pub const LABEL_SSL: &str = "nginx-ingress.ssl";
pub const LABEL_SSL_REDIRECT: &str = "nginx-ingress.ssl-redirect";
pub const LABEL_PROXY_PROTOCOL: &str = "nginx-ingress.proxy-protocol";

/// Label on certificate secrets holding the expiry as unix seconds.
pub const LABEL_EXPIRES: &str = "expires";

/// Certificates are renewed once they expire within this window.
pub const RENEWAL_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// A matched key/certificate secret pair at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub version: u64,
    pub key: StoreEntry,
    pub cert: StoreEntry,
}

/// Sync snapshot of everything the proxy config renderer needs to know
/// about one service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub id: String,
    pub name: String,
    pub hosts: Vec<String>,
    pub port: u16,
    pub path: String,
    pub acme_ssl: bool,
    pub ssl_redirect: bool,
    pub proxy_protocol: Option<String>,
    pub cert_pair: Option<CertPair>,
}

/// Label-level view over one managed application service.
#[derive(Clone)]
pub struct ServiceView {
    orchestrator: Arc<dyn Orchestrator>,
    info: ServiceInfo,
    names: Namespace,
}

impl ServiceView {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, info: ServiceInfo, names: Namespace) -> Self {
        Self {
            orchestrator,
            info,
            names,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.info.labels
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.info.labels.get(key).map(String::as_str)
    }

    /// Hostnames routed to this service; empty components are dropped.
    pub fn hosts(&self) -> Vec<String> {
        self.label(LABEL_HOST)
            .unwrap_or("")
            .split(',')
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Upstream port; defaults to 80, must fall in `1..=65535`.
    pub fn port(&self) -> Result<u16> {
        match self.label(LABEL_PORT) {
            None => Ok(80),
            Some(raw) => {
                let port: u16 = raw.parse().map_err(|_| {
                    IngressError::validation(format!(
                        "service {}: invalid port label {:?}",
                        self.info.name, raw
                    ))
                })?;
                if port == 0 {
                    return Err(IngressError::validation(format!(
                        "service {}: invalid port 0",
                        self.info.name
                    )));
                }
                Ok(port)
            }
        }
    }

    /// Upstream path prefix; defaults to `/`.
    pub fn path(&self) -> String {
        self.label(LABEL_PATH).unwrap_or("/").to_string()
    }

    /// Whether the service opted into ACME certificate provisioning.
    pub fn acme_ssl(&self) -> bool {
        self.info.labels.contains_key(LABEL_SSL)
    }

    /// Whether the proxy should redirect plain HTTP to HTTPS.
    pub fn ssl_redirect(&self) -> bool {
        self.info.labels.contains_key(LABEL_SSL_REDIRECT)
    }

    /// PROXY protocol opt-in value, if present.
    pub fn proxy_protocol(&self) -> Option<String> {
        self.label(LABEL_PROXY_PROTOCOL).map(str::to_string)
    }

    /// Secrets mounted into the service, keyed by mount target.
    pub fn mounted_secrets(&self) -> HashMap<String, String> {
        self.info
            .secrets
            .iter()
            .map(|secret| (secret.target.clone(), secret.secret_name.clone()))
            .collect()
    }

    /// Versioned private-key family of this service.
    pub fn keys(&self) -> VersionedStore {
        VersionedStore::new(
            self.orchestrator.clone(),
            StoreKind::Secret,
            self.names.svc_key_prefix(&self.info.id),
        )
    }

    /// Versioned certificate family of this service.
    pub fn certs(&self) -> VersionedStore {
        VersionedStore::new(
            self.orchestrator.clone(),
            StoreKind::Secret,
            self.names.svc_crt_prefix(&self.info.id),
        )
    }

    /// The key/cert pair at the highest version present in both families.
    pub async fn latest_cert_pair(&self) -> Result<Option<CertPair>> {
        let common = self.keys().common_versions(&self.certs()).await?;
        Ok(common
            .into_iter()
            .next_back()
            .map(|(version, (key, cert))| CertPair { version, key, cert }))
    }

    /// The version of the latest usable pair.
    pub async fn latest_cert_version(&self) -> Result<Option<u64>> {
        Ok(self.latest_cert_pair().await?.map(|pair| pair.version))
    }

    /// Whether the latest certificate expires within the renewal window.
    /// False when no pair exists.
    pub async fn cert_renewable(&self) -> Result<bool> {
        match self.latest_cert_pair().await? {
            None => Ok(false),
            Some(pair) => {
                let now = jiff::Timestamp::now().as_second();
                expires_before(&pair.cert, now + RENEWAL_WINDOW_SECS)
            }
        }
    }

    /// Snapshot the parsed labels and current cert pair for rendering.
    pub async fn snapshot(&self) -> Result<ServiceSnapshot> {
        Ok(ServiceSnapshot {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            hosts: self.hosts(),
            port: self.port()?,
            path: self.path(),
            acme_ssl: self.acme_ssl(),
            ssl_redirect: self.ssl_redirect(),
            proxy_protocol: self.proxy_protocol(),
            cert_pair: self.latest_cert_pair().await?,
        })
    }
}

impl std::fmt::Debug for ServiceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceView")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("hosts", &self.hosts())
            .finish()
    }
}

/// All application services carrying the ingress host label.
pub async fn ingress_services(
    orchestrator: Arc<dyn Orchestrator>,
    names: &Namespace,
) -> Result<Vec<ServiceView>> {
    let services = orchestrator.list_labelled_services(LABEL_HOST).await?;
    Ok(services
        .into_iter()
        .map(|info| ServiceView::new(orchestrator.clone(), info, names.clone()))
        .collect())
}

/// Whether an entry's `expires` label is strictly before `deadline`
/// (unix seconds). The label is parsed as a float to tolerate fractional
/// timestamps written by earlier controller versions.
pub fn expires_before(entry: &StoreEntry, deadline: i64) -> Result<bool> {
    let raw = entry.label(LABEL_EXPIRES).ok_or_else(|| {
        IngressError::invariant(format!("secret {} has no expires label", entry.name))
    })?;
    let expires: f64 = raw.parse().map_err(|_| {
        IngressError::invariant(format!(
            "secret {} has unparseable expires label {:?}",
            entry.name, raw
        ))
    })?;
    Ok(expires < deadline as f64)
}
