//! Cluster configuration
//!
//! The controller reads its own configuration from the latest entry of the
//! versioned `<ns>.config.<N>` family: a YAML document describing the ACME
//! account contact and the four managed workloads. Everything except the
//! ACME email and ToS acceptance has a default.

use crate::error::{IngressError, Result};
use crate::names::Namespace;
use crate::orchestrator::{EndpointSpec, Orchestrator, PortMapping, PortMode, ServiceMode};
use crate::store::{StoreKind, VersionedStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Overlay network shared by the reverse proxy, the challenge responder, and
/// upstream application services.
pub const INGRESS_NETWORK: &str = "nginx-docker-ingress";

/// Root of the cluster configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRoot {
    pub acme: ConfigAcme,

    #[serde(default)]
    pub services: ConfigServices,
}

/// ACME account settings. Both fields are mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAcme {
    /// Operator contact email.
    pub email: String,

    /// Must be `true`; certificate issuance implies accepting the CA's terms.
    pub accept_tos: bool,
}

/// Published HTTP/HTTPS ports of the reverse proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPorts {
    #[serde(default = "default_http_port")]
    pub http: u16,

    #[serde(default = "default_https_port")]
    pub https: u16,
}

/// How the proxy's ports are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    #[default]
    Ingress,
    Host,
    None,
}

/// Replication mode of the proxy workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigServiceMode {
    #[default]
    Replicated,
    Global,
}

/// One placement preference. Only the `spread` strategy exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementPreference {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    pub descriptor: String,
}

impl PlacementPreference {
    pub fn as_tuple(&self) -> (String, String) {
        (self.strategy.clone(), self.descriptor.clone())
    }
}

/// Account bootstrap workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigServiceAccount {
    #[serde(default = "default_account_name")]
    pub name: String,
    #[serde(default = "default_robot_image")]
    pub image: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Challenge responder workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigServiceChallenge {
    #[serde(default = "default_challenge_name")]
    pub name: String,
    #[serde(default = "default_challenge_image")]
    pub image: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Observe-and-renew worker workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigServiceRobot {
    #[serde(default = "default_robot_name")]
    pub name: String,
    #[serde(default = "default_robot_image")]
    pub image: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Reverse proxy workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigServiceNginx {
    #[serde(default = "default_nginx_name")]
    pub name: String,
    #[serde(default = "default_nginx_image")]
    pub image: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub ports: ConfigPorts,
    #[serde(default)]
    pub port_mode: PublishMode,
    #[serde(default)]
    pub attach_to_host_network: bool,
    #[serde(default = "default_replicas")]
    pub replicas: u64,
    #[serde(default)]
    pub service_mode: ConfigServiceMode,
    #[serde(default)]
    pub preferences: Vec<PlacementPreference>,
    #[serde(default)]
    pub maxreplicas: Option<u64>,
    #[serde(default = "default_networks")]
    pub networks: Vec<String>,
}

impl ConfigServiceNginx {
    /// The endpoint spec implied by `port_mode` and `ports`, if any.
    pub fn endpoint_spec(&self) -> Option<EndpointSpec> {
        let mode = match self.port_mode {
            PublishMode::Ingress => PortMode::Ingress,
            PublishMode::Host => PortMode::Host,
            PublishMode::None => return None,
        };
        Some(EndpointSpec {
            mode,
            ports: vec![
                PortMapping {
                    published: self.ports.http,
                    target: 80,
                },
                PortMapping {
                    published: self.ports.https,
                    target: 443,
                },
            ],
        })
    }

    pub fn service_mode(&self) -> ServiceMode {
        match self.service_mode {
            ConfigServiceMode::Replicated => ServiceMode::Replicated {
                replicas: self.replicas,
            },
            ConfigServiceMode::Global => ServiceMode::Global,
        }
    }

    /// Networks the proxy attaches to, including `host` when requested.
    pub fn all_networks(&self) -> Vec<String> {
        let mut networks = self.networks.clone();
        if self.attach_to_host_network {
            networks.push("host".to_string());
        }
        networks
    }
}

/// The four managed workloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigServices {
    #[serde(default)]
    pub account: ConfigServiceAccount,
    #[serde(default)]
    pub challenge: ConfigServiceChallenge,
    #[serde(default)]
    pub nginx: ConfigServiceNginx,
    #[serde(default)]
    pub robot: ConfigServiceRobot,
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_strategy() -> String {
    "spread".to_string()
}

fn default_account_name() -> String {
    "ndi-account".to_string()
}

fn default_challenge_name() -> String {
    "ndi-challenge".to_string()
}

fn default_nginx_name() -> String {
    "ndi-nginx".to_string()
}

fn default_robot_name() -> String {
    "ndi-robot".to_string()
}

fn default_robot_image() -> String {
    "ndi/robot:latest".to_string()
}

fn default_challenge_image() -> String {
    "ndi/challenge:latest".to_string()
}

fn default_nginx_image() -> String {
    "ndi/nginx:latest".to_string()
}

fn default_replicas() -> u64 {
    1
}

fn default_networks() -> Vec<String> {
    vec![INGRESS_NETWORK.to_string()]
}

impl Default for ConfigPorts {
    fn default() -> Self {
        Self {
            http: default_http_port(),
            https: default_https_port(),
        }
    }
}

impl Default for ConfigServiceAccount {
    fn default() -> Self {
        Self {
            name: default_account_name(),
            image: default_robot_image(),
            constraints: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

impl Default for ConfigServiceChallenge {
    fn default() -> Self {
        Self {
            name: default_challenge_name(),
            image: default_challenge_image(),
            constraints: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

impl Default for ConfigServiceRobot {
    fn default() -> Self {
        Self {
            name: default_robot_name(),
            image: default_robot_image(),
            constraints: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

impl Default for ConfigServiceNginx {
    fn default() -> Self {
        Self {
            name: default_nginx_name(),
            image: default_nginx_image(),
            constraints: Vec::new(),
            labels: HashMap::new(),
            ports: ConfigPorts::default(),
            port_mode: PublishMode::default(),
            attach_to_host_network: false,
            replicas: default_replicas(),
            service_mode: ConfigServiceMode::default(),
            preferences: Vec::new(),
            maxreplicas: None,
            networks: default_networks(),
        }
    }
}

impl Default for ConfigServices {
    fn default() -> Self {
        Self {
            account: ConfigServiceAccount::default(),
            challenge: ConfigServiceChallenge::default(),
            nginx: ConfigServiceNginx::default(),
            robot: ConfigServiceRobot::default(),
        }
    }
}

impl ConfigRoot {
    /// Parse and validate a YAML document.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: ConfigRoot = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints and cross-service uniqueness.
    pub fn validate(&self) -> Result<()> {
        let email_re = regex::Regex::new(r"^.+@.+$")
            .map_err(|_| IngressError::validation("invalid email pattern"))?;
        if !email_re.is_match(&self.acme.email) {
            return Err(IngressError::validation(format!(
                "invalid email address: {}",
                self.acme.email
            )));
        }

        if !self.acme.accept_tos {
            return Err(IngressError::validation(
                "you must accept the certificate authority's terms of service",
            ));
        }

        for port in [self.services.nginx.ports.http, self.services.nginx.ports.https] {
            if port == 0 {
                return Err(IngressError::validation("invalid port 0"));
            }
        }

        for preference in &self.services.nginx.preferences {
            if preference.strategy != "spread" {
                return Err(IngressError::validation(format!(
                    "invalid placement strategy: {}",
                    preference.strategy
                )));
            }
        }

        let names = [
            &self.services.account.name,
            &self.services.challenge.name,
            &self.services.nginx.name,
            &self.services.robot.name,
        ];
        for (i, name) in names.iter().enumerate() {
            if names[i + 1..].contains(name) {
                return Err(IngressError::validation(format!(
                    "duplicate service name: {}",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Read and parse the latest cluster configuration entry.
pub async fn load_cluster_config(
    orchestrator: Arc<dyn Orchestrator>,
    names: &Namespace,
) -> Result<ConfigRoot> {
    let store = VersionedStore::new(orchestrator, StoreKind::Config, names.config_prefix());
    let latest = store.latest().await?.ok_or_else(|| {
        IngressError::validation(format!(
            "config missing, try adding a cluster config called {}0",
            names.config_prefix()
        ))
    })?;

    let data = String::from_utf8(latest.data).map_err(|_| {
        IngressError::validation(format!("config {} is not valid UTF-8", latest.name))
    })?;

    ConfigRoot::from_yaml(&data)
}
