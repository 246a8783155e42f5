use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::config::AlarmDefaults;
use crate::manager::AlarmsManager;
use crate::tracing::prelude::*;

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub manager: AlarmsManager,
    /// Applied to fields a client leaves out when submitting an alarm.
    pub defaults: AlarmDefaults,
}

impl SharedState {
    pub fn new(manager: AlarmsManager, defaults: AlarmDefaults) -> Self {
        Self { manager, defaults }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "reveille",
        description = "Alarm clock daemon API. Version 0 is unstable.",
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "alarms", description = "Alarm definitions and lifecycle events"),
        (name = "schedule", description = "Next scheduled wake"),
    ),
)]
struct ApiDoc;

/// Build the application router: versioned API, OpenAPI document and
/// Swagger UI.
pub fn router(state: SharedState) -> Router {
    let (api_router, openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    api_router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("API server failed")?;

    debug!("API server stopped");
    Ok(())
}
