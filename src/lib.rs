//! # ndi - Swarm ingress control plane
//!
//! An ingress controller for Docker Swarm-style clusters. Application
//! services opt in by attaching `nginx-ingress.*` labels; the controller
//! keeps an nginx reverse proxy running with a rendered configuration and
//! obtains Let's Encrypt certificates for the labelled hostnames using the
//! ACME HTTP-01 challenge.
//!
//! ## Architecture
//!
//! - **Controller**: the reconcile loop. Bootstraps the ACME account and DH
//!   parameters, keeps the observe worker and challenge responder running,
//!   and converges the proxy workload every tick.
//! - **Robot**: the observe worker. Classifies services as needing a new or
//!   renewed certificate and drives concurrent ACME orders.
//! - **ChallengeServer**: answers HTTP-01 requests from key authorizations
//!   published in the cluster config store.
//!
//! All persistent state lives in the cluster's secret and config stores;
//! every component can be restarted at any point. The cluster API, the ACME
//! transport, and key generation sit behind the [`Orchestrator`],
//! [`AcmeClient`], and [`Crypto`] traits.

// Module declarations
pub mod acme;
pub mod challenge;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod names;
pub mod orchestrator;
pub mod render;
pub mod robot;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use acme::{AccountCredentials, AcmeAgent, AcmeClient, IssuancePhase};
pub use challenge::ChallengeServer;
pub use config::{load_cluster_config, ConfigRoot, INGRESS_NETWORK};
pub use controller::Controller;
pub use crypto::{Crypto, OpensslCrypto};
pub use error::{IngressError, Result};
pub use names::Namespace;
pub use orchestrator::{MemoryOrchestrator, Orchestrator};
pub use render::{ConfigRenderer, NginxRenderer, RenderedConfig};
pub use robot::{CertNeed, Robot, RobotRole};
pub use service::{ServiceSnapshot, ServiceView};
pub use store::{StoreKind, VersionedStore};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        acme::{
            AccountCredentials, AcmeAgent, AcmeAuthorization, AcmeChallenge, AcmeClient,
            AcmeOrder, AuthorizationStatus, ChallengeType, OrderStatus,
        },
        challenge::ChallengeServer,
        config::{load_cluster_config, ConfigRoot},
        controller::Controller,
        crypto::{Crypto, KeyCsr, OpensslCrypto},
        error::{IngressError, Result},
        names::Namespace,
        orchestrator::{
            MemoryOrchestrator, Orchestrator, SecretRef, ServiceInfo, ServiceSpec, StoreEntry,
            TaskInfo, TaskState,
        },
        render::{ConfigRenderer, NginxRenderer, RenderedConfig},
        robot::{CertNeed, Robot, RobotRole},
        service::{ServiceSnapshot, ServiceView},
        store::{StoreKind, VersionedStore},
    };
}
