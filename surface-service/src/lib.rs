//! Surface Service Library
//!
//! HTTP handlers and routing for the terrain analysis service.
//! This library is used by both the surface-service binary and integration tests.

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use surface::{CapabilitySet, ResourceRouter};

/// Application state shared across handlers.
pub struct AppState {
    /// Resource tree and operation handlers.
    pub router: ResourceRouter,
    /// Capabilities enabled for this instance.
    pub capabilities: CapabilitySet,
}

/// Build the service routes over `state`.
///
/// Middleware and API docs are added by the binary.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::get_root))
        .route("/Info", get(handlers::get_info))
        .route("/Help", get(handlers::get_help))
        .route("/SurfaceLayers", get(handlers::get_layers))
        .route("/SurfaceLayers/:id", get(handlers::get_layer))
        .route(
            "/SurfaceLayers/:id/:operation",
            get(handlers::get_operation).post(handlers::post_operation),
        )
        .route("/schema", get(handlers::get_schema))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{ErrorBody, ErrorResponse, HealthResponse};
