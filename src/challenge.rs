//! HTTP-01 challenge responder
//!
//! Answers `GET /.well-known/acme-challenge/{token}` with the key
//! authorization published for that token in the cluster config store.
//! The responder itself is stateless; validation works from any replica
//! because the store is the single source of truth.

use crate::error::Result;
use crate::names::Namespace;
use crate::orchestrator::Orchestrator;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// ACME validation servers connect to plain HTTP port 80.
pub const CHALLENGE_PORT: u16 = 80;

/// Serves HTTP-01 key authorizations from the orchestrator's config store.
pub struct ChallengeServer {
    orchestrator: Arc<dyn Orchestrator>,
    names: Namespace,
}

impl ChallengeServer {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, names: Namespace) -> Self {
        Self {
            orchestrator,
            names,
        }
    }

    /// The responder's router; unknown paths fall through to 404.
    pub fn router(self) -> Router {
        Router::new()
            .route(
                "/.well-known/acme-challenge/{token}",
                get(handle_challenge),
            )
            .with_state(Arc::new(self))
    }

    /// Bind and serve forever.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Challenge responder listening on {}", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Serve on all interfaces at the well-known challenge port.
    pub async fn serve_default(self) -> Result<()> {
        self.serve(SocketAddr::from(([0, 0, 0, 0], CHALLENGE_PORT)))
            .await
    }
}

async fn handle_challenge(
    Path(token): Path<String>,
    State(server): State<Arc<ChallengeServer>>,
) -> Response {
    tracing::info!("Challenge request for token {}", token);

    let entry = match server
        .orchestrator
        .get_config(&server.names.challenge_config(&token))
        .await
    {
        Ok(Some(entry)) => entry,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read challenge config for {}: {}", token, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Entries hold the base64-encoded key authorization.
    let key_authorization = match BASE64
        .decode(&entry.data)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(text) => text,
        None => {
            tracing::error!("Challenge config for {} is not base64 text", token);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        key_authorization,
    )
        .into_response()
}
