//! Per-service certificate issuance workflow.

use super::{AcmeClient, AuthorizationStatus, ChallengeType, OrderStatus};
use crate::crypto::{leaf_expiry, Crypto};
use crate::error::{IngressError, Result};
use crate::names::Namespace;
use crate::orchestrator::Orchestrator;
use crate::service::{ServiceView, LABEL_EXPIRES};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Progress of one issuance through the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuancePhase {
    Created,
    Challenging,
    Ready,
    Finalizing,
    Valid,
}

impl std::fmt::Display for IssuancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            IssuancePhase::Created => "created",
            IssuancePhase::Challenging => "challenging",
            IssuancePhase::Ready => "ready",
            IssuancePhase::Finalizing => "finalizing",
            IssuancePhase::Valid => "valid",
        };
        write!(f, "{}", phase)
    }
}

/// Runs the ACME workflow for one service at a time: order, publish HTTP-01
/// responses, wait for validation, finalize with a fresh key, persist the
/// issued pair as the next secret version.
///
/// Any failure aborts without writing secrets; published challenge configs
/// are left in place and the next observe tick retries with a fresh order.
pub struct AcmeAgent {
    orchestrator: Arc<dyn Orchestrator>,
    acme: Arc<dyn AcmeClient>,
    crypto: Arc<dyn Crypto>,
    names: Namespace,
}

impl AcmeAgent {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        acme: Arc<dyn AcmeClient>,
        crypto: Arc<dyn Crypto>,
        names: Namespace,
    ) -> Self {
        Self {
            orchestrator,
            acme,
            crypto,
            names,
        }
    }

    fn advance(&self, service: &ServiceView, from: IssuancePhase, to: IssuancePhase) -> IssuancePhase {
        tracing::debug!("Order for {}: {} -> {}", service.name(), from, to);
        to
    }

    /// Obtain and persist one new certificate version for `service`.
    /// Returns the version written.
    pub async fn order_certificate(&self, service: &ServiceView) -> Result<u64> {
        let hosts = service.hosts();
        if hosts.is_empty() {
            return Err(IngressError::validation(format!(
                "service {} has no hosts to order a certificate for",
                service.name()
            )));
        }

        tracing::info!("Ordering certificate for {} ({:?})", service.name(), hosts);

        let next_version = match service.latest_cert_version().await? {
            Some(version) => version + 1,
            None => 0,
        };

        let order = self.acme.new_order(&hosts).await?;
        let mut phase = IssuancePhase::Created;

        let authorizations = self.acme.authorizations(&order).await?;
        if authorizations.is_empty() {
            return Err(IngressError::acme("order has no authorizations"));
        }

        // Publish every key authorization before the endpoint is told to
        // validate any of them; the responder answers from these entries.
        let thumbprint = self.acme.key_thumbprint().await?;
        let mut challenges = Vec::with_capacity(authorizations.len());
        for authorization in &authorizations {
            let challenge = authorization
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| {
                    IngressError::acme(format!(
                        "no http-01 challenge offered for {}",
                        authorization.identifier
                    ))
                })?;

            let key_authorization = format!("{}.{}", challenge.token, thumbprint);
            self.orchestrator
                .write_config(
                    &self.names.challenge_config(&challenge.token),
                    BASE64.encode(key_authorization).as_bytes(),
                    HashMap::new(),
                )
                .await?;
            challenges.push(challenge.clone());
        }

        phase = self.advance(service, phase, IssuancePhase::Challenging);

        join_all(
            challenges
                .iter()
                .map(|challenge| self.acme.trigger_challenge(challenge)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        tracing::info!("Awaiting {} authorizations", authorizations.len());

        let statuses = join_all(
            authorizations
                .iter()
                .map(|authorization| self.acme.wait_authorization(authorization)),
        )
        .await;
        for (authorization, status) in authorizations.iter().zip(statuses) {
            let status = status?;
            if status != AuthorizationStatus::Valid {
                return Err(IngressError::acme(format!(
                    "authorization for {} ended {}",
                    authorization.identifier, status
                )));
            }
        }

        let status = self.acme.wait_order_not_pending(&order).await?;
        if status != OrderStatus::Ready {
            return Err(IngressError::acme(format!(
                "order is in state {} expecting ready",
                status
            )));
        }
        phase = self.advance(service, phase, IssuancePhase::Ready);

        let key_csr = self.crypto.generate_key_and_csr(&hosts).await?;

        tracing::info!("Finalizing order for {}", service.name());
        self.acme.finalize(&order, &key_csr.csr_der).await?;
        phase = self.advance(service, phase, IssuancePhase::Finalizing);

        let status = self.acme.wait_order_finalized(&order).await?;
        if status != OrderStatus::Valid {
            return Err(IngressError::acme(format!(
                "finalized order ended {} expecting valid",
                status
            )));
        }
        self.advance(service, phase, IssuancePhase::Valid);

        let cert_pem = self.acme.certificate(&order).await?;
        let expires = leaf_expiry(&cert_pem)?;

        let key_name = service.keys().name_at(next_version);
        let cert_name = service.certs().name_at(next_version);

        // A half-written pair from a crashed run may occupy the slot.
        self.orchestrator.delete_secret(&key_name).await?;
        self.orchestrator.delete_secret(&cert_name).await?;

        tracing::info!("Writing secrets for {} at version {}", service.name(), next_version);

        self.orchestrator
            .write_secret(&key_name, key_csr.key_pem.as_bytes(), HashMap::new())
            .await?;

        let mut labels = HashMap::new();
        labels.insert(LABEL_EXPIRES.to_string(), expires.to_string());
        self.orchestrator
            .write_secret(&cert_name, cert_pem.as_bytes(), labels)
            .await?;

        tracing::info!("Order complete for {}", service.name());

        Ok(next_version)
    }
}
