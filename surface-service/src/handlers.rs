//! HTTP request handlers for the surface service.
//!
//! Every resource and operation path is forwarded to the library's
//! [`ResourceRouter`](surface::ResourceRouter); the handlers only translate
//! between HTTP and the router's input map and byte response.

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use surface::InputMap;
use utoipa::ToSchema;

use crate::AppState;

/// Raw `name=value` pairs from a query string or urlencoded form.
pub type RawInputs = Vec<(String, String)>;

/// Urlencoded form extractor; aliased so utoipa does not try to derive a
/// request body schema for the raw pair list.
type FormInputs = Form<RawInputs>;

/// Name of the output format parameter.
const FORMAT_PARAM: &str = "f";

/// Error envelope returned by every failing request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error code and message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// HTTP status code.
    pub code: u16,
    /// Error message.
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Split the format parameter off the raw inputs.
fn split_format(raw: RawInputs) -> (Option<String>, InputMap) {
    let mut format = None;
    let mut pairs = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        if name == FORMAT_PARAM {
            format = Some(value);
        } else {
            pairs.push((name, value));
        }
    }
    (format, InputMap::from_pairs(pairs))
}

/// Run one request through the router on the blocking pool.
async fn dispatch(
    state: Arc<AppState>,
    path: String,
    raw: RawInputs,
) -> axum::response::Response {
    let (format, inputs) = split_format(raw);
    tracing::debug!(path = %path, format = ?format, inputs = inputs.len(), "Surface request");

    let result = tokio::task::spawn_blocking(move || {
        state
            .router
            .dispatch(&state.capabilities, &path, None, format.as_deref(), &inputs)
    })
    .await;

    match result {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                [(header::CONTENT_TYPE, response.content_type)],
                response.body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Request task failed");
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            (
                status,
                Json(ErrorResponse {
                    error: ErrorBody {
                        code: status.as_u16(),
                        message: "Internal error".to_string(),
                    },
                }),
            )
                .into_response()
        }
    }
}

/// Service root: description and published surface layers.
#[utoipa::path(
    get,
    path = "/",
    tag = "resources",
    params(("f" = Option<String>, Query, description = "Output format: json or pjson")),
    responses((status = 200, description = "Service description"))
)]
pub async fn get_root(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, String::new(), raw).await
}

/// Service version, configuration and enabled capabilities.
#[utoipa::path(
    get,
    path = "/Info",
    tag = "resources",
    responses((status = 200, description = "Service information"))
)]
pub async fn get_info(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, "Info".to_string(), raw).await
}

/// Requirements, properties, resources and operations of the service.
#[utoipa::path(
    get,
    path = "/Help",
    tag = "resources",
    responses((status = 200, description = "Help document"))
)]
pub async fn get_help(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, "Help".to_string(), raw).await
}

/// List the published surface layers.
#[utoipa::path(
    get,
    path = "/SurfaceLayers",
    tag = "resources",
    responses((status = 200, description = "Surface layer list"))
)]
pub async fn get_layers(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, "SurfaceLayers".to_string(), raw).await
}

/// Describe one surface layer.
#[utoipa::path(
    get,
    path = "/SurfaceLayers/{id}",
    tag = "resources",
    params(("id" = i64, Path, description = "Surface layer id")),
    responses(
        (status = 200, description = "Surface layer"),
        (status = 400, description = "Malformed layer id", body = ErrorResponse),
        (status = 404, description = "Unknown layer id", body = ErrorResponse)
    )
)]
pub async fn get_layer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, format!("SurfaceLayers/{}", id), raw).await
}

/// Run an operation with inputs from the query string.
///
/// Values are decoded as JSON when they parse, so geometries and extents are
/// passed as JSON text, e.g. `geometry={"x":1,"y":2}`.
#[utoipa::path(
    get,
    path = "/SurfaceLayers/{id}/{operation}",
    tag = "operations",
    params(
        ("id" = i64, Path, description = "Surface layer id"),
        ("operation" = String, Path, description = "Operation name, e.g. GetElevationAtLonLat")
    ),
    responses(
        (status = 200, description = "Operation result"),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 403, description = "Capability disabled", body = ErrorResponse),
        (status = 404, description = "Unknown layer or operation", body = ErrorResponse),
        (status = 413, description = "Grid too large", body = ErrorResponse),
        (status = 422, description = "Outside the surface domain", body = ErrorResponse)
    )
)]
pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path((id, operation)): Path<(String, String)>,
    Query(raw): Query<RawInputs>,
) -> impl IntoResponse {
    dispatch(state, format!("SurfaceLayers/{}/{}", id, operation), raw).await
}

/// Run an operation with inputs from a urlencoded form.
#[utoipa::path(
    post,
    path = "/SurfaceLayers/{id}/{operation}",
    tag = "operations",
    params(
        ("id" = i64, Path, description = "Surface layer id"),
        ("operation" = String, Path, description = "Operation name, e.g. GetElevations")
    ),
    responses(
        (status = 200, description = "Operation result"),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 403, description = "Capability disabled", body = ErrorResponse)
    )
)]
pub async fn post_operation(
    State(state): State<Arc<AppState>>,
    Path((id, operation)): Path<(String, String)>,
    Form(raw): FormInputs,
) -> impl IntoResponse {
    dispatch(state, format!("SurfaceLayers/{}/{}", id, operation), raw).await
}

/// The resource tree with every operation and its inputs.
#[utoipa::path(
    get,
    path = "/schema",
    tag = "system",
    responses((status = 200, description = "Resource schema"))
)]
pub async fn get_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.schema())
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_format() {
        let raw = vec![
            ("lon".to_string(), "7.5".to_string()),
            ("f".to_string(), "pjson".to_string()),
            ("lat".to_string(), "46.5".to_string()),
        ];
        let (format, inputs) = split_format(raw);
        assert_eq!(format.as_deref(), Some("pjson"));
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.get("lon"), Some(&serde_json::json!(7.5)));
        assert!(!inputs.contains("f"));
    }

    #[test]
    fn test_split_format_keeps_strings() {
        let raw = vec![("units".to_string(), "Percent".to_string())];
        let (format, inputs) = split_format(raw);
        assert!(format.is_none());
        assert_eq!(inputs.get("units"), Some(&serde_json::json!("Percent")));
    }

    #[test]
    fn test_error_response_serialize() {
        let response = ErrorResponse {
            error: ErrorBody {
                code: 404,
                message: "Could not find layer id: 9".to_string(),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["message"], "Could not find layer id: 9");
    }

    #[test]
    fn test_health_response_serialize() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }
}
