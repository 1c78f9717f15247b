//! # Admission Webhooks
//!
//! The mutating endpoint injects Decofile volumes/env into Knative Services on
//! create/update; the validating endpoint guards Decofile deletion while any
//! Service is still bound.
//!
//! TLS is terminated outside the process (certificate issuance is an external
//! concern); the server listens on plain HTTP.

use axum::routing::post;
use axum::Router;
use kube::Client;

pub mod mutate;
pub mod validate;

/// Shared state for the admission handlers
#[derive(Clone)]
pub struct WebhookContext {
    pub client: Client,
}

impl std::fmt::Debug for WebhookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookContext").finish()
    }
}

/// Admission router: one mutating and one validating endpoint
pub fn router(ctx: WebhookContext) -> Router {
    Router::new()
        .route("/mutate-service", post(mutate::handler))
        .route("/validate-decofile", post(validate::handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve the admission endpoints until the process exits
pub async fn start_webhook_server(port: u16, ctx: WebhookContext) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Admission webhook listening on :{}", port);
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
