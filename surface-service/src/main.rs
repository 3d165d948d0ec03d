//! Surface Service - HTTP microservice for terrain analysis queries.
//!
//! Publishes every single-band elevation layer under a data directory and
//! answers elevation, grid, slope, aspect, contour and visibility queries
//! against them.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SURFACE_DATA_DIR` | Layer root; each sub-directory of .hgt tiles is a layer | `.` |
//! | `SURFACE_CACHE_SIZE` | Maximum tiles in cache per layer | 100 |
//! | `SURFACE_PORT` | HTTP server port | 8080 |
//! | `SURFACE_CAPABILITIES` | Comma-separated capability labels, or `all` | `Elevation at lon-lat,Elevations` |
//! | `SURFACE_INTERPOLATION_COUNT` | Densification target for GetElevations | 100 |
//! | `SURFACE_MAX_DATA_VALUES` | Cap on rows * columns for GetElevationData | 10000 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `GET /` - Service description and surface layers
//! - `GET /Info`, `GET /Help` - Service information and help
//! - `GET /SurfaceLayers[/{id}]` - Surface layer descriptions
//! - `GET|POST /SurfaceLayers/{id}/{operation}` - Run an operation
//! - `GET /schema` - Resource tree
//! - `GET /health` - Health check
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use surface::dem::DEFAULT_CACHE_SIZE;
use surface::{CapabilitySet, DemCatalog, LayerRegistry, PlanarEngine, ResourceRouter, SurfaceConfig};
use surface_service::{create_router, handlers, AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation for the surface service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Surface Analysis Service",
        version = "0.1.0",
        description = "Terrain analysis queries against published elevation layers.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::get_root,
        handlers::get_info,
        handlers::get_help,
        handlers::get_layers,
        handlers::get_layer,
        handlers::get_operation,
        handlers::post_operation,
        handlers::get_schema,
        handlers::health_check,
    ),
    components(
        schemas(
            handlers::ErrorResponse,
            handlers::ErrorBody,
            handlers::HealthResponse,
        )
    ),
    tags(
        (name = "resources", description = "Service and surface layer resources"),
        (name = "operations", description = "Terrain analysis operations"),
        (name = "system", description = "System and health endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surface_service=info,surface=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = std::env::var("SURFACE_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let data_dir = match std::env::var("SURFACE_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            tracing::warn!("SURFACE_DATA_DIR not set, using current directory");
            PathBuf::from(".")
        }
    };
    let cache_size = match std::env::var("SURFACE_CACHE_SIZE") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("SURFACE_CACHE_SIZE must be an integer, got '{}'", raw))?,
        Err(_) => DEFAULT_CACHE_SIZE,
    };

    let config = SurfaceConfig::from_env().context("invalid surface configuration")?;
    let capabilities = CapabilitySet::from_env().context("invalid SURFACE_CAPABILITIES")?;

    let catalog = DemCatalog::open_dir(&data_dir, cache_size)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    let registry = LayerRegistry::discover(&catalog);

    tracing::info!(
        data_dir = %data_dir.display(),
        cache_size,
        layers = registry.layers().len(),
        interpolation_count = config.interpolation_count,
        max_data_values = config.max_data_values,
        capabilities = ?capabilities.labels(),
        port,
        "Starting surface service"
    );

    let state = Arc::new(AppState {
        router: ResourceRouter::new(registry, Arc::new(PlanarEngine::new()), config),
        capabilities,
    });

    let app = create_router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
