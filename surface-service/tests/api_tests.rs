//! Integration tests for the HTTP API.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use surface::{
    CapabilitySet, DemCatalog, LayerRegistry, PlanarEngine, ResourceRouter, SurfaceConfig,
};
use surface_service::{create_router, AppState};
use tempfile::TempDir;

/// File size for SRTM3 (1201 × 1201 × 2 bytes)
const SRTM3_SIZE: usize = 1201 * 1201 * 2;
const SRTM3_SAMPLES: usize = 1201;

/// Create an SRTM3 tile whose elevation equals the row index, so the
/// ground rises towards the south edge by one metre per sample.
fn create_ramp_tile(dir: &Path, filename: &str) {
    let mut data = vec![0u8; SRTM3_SIZE];
    for row in 0..SRTM3_SAMPLES {
        let bytes = (row as i16).to_be_bytes();
        for col in 0..SRTM3_SAMPLES {
            let offset = (row * SRTM3_SAMPLES + col) * 2;
            data[offset] = bytes[0];
            data[offset + 1] = bytes[1];
        }
    }

    let mut file = File::create(dir.join(filename)).unwrap();
    file.write_all(&data).unwrap();
}

/// One layer ("alps", id 0) holding the N46E007 tile.
fn create_data_dir() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let layer_dir = temp_dir.path().join("alps");
    fs::create_dir(&layer_dir).unwrap();
    create_ramp_tile(&layer_dir, "N46E007.hgt");
    temp_dir
}

fn create_test_server(temp_dir: &TempDir, capabilities: CapabilitySet) -> TestServer {
    let catalog = DemCatalog::open_dir(temp_dir.path(), 10).unwrap();
    let router = ResourceRouter::new(
        LayerRegistry::discover(&catalog),
        Arc::new(PlanarEngine::new()),
        SurfaceConfig::default(),
    );
    let state = Arc::new(AppState {
        router,
        capabilities,
    });
    TestServer::new(create_router(state)).unwrap()
}

fn assert_error(body: &Value, code: u16) {
    assert_eq!(body["error"]["code"], code);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_health() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_root_lists_layers() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server.get("/").await;
    response.assert_status_ok();
    let body: Value = response.json();
    let layers = body["surfaceLayers"].as_array().unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0]["id"], 0);
    assert_eq!(layers[0]["name"], "alps");
}

#[tokio::test]
async fn test_layer_resources() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let body: Value = server.get("/SurfaceLayers").await.json();
    assert_eq!(body["SurfaceLayers"].as_array().unwrap().len(), 1);

    let response = server.get("/SurfaceLayers/0").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "alps");
    assert_eq!(body["extent"]["spatialReference"]["wkid"], 4326);

    let response = server.get("/SurfaceLayers/9").await;
    response.assert_status_not_found();
    assert_error(&response.json(), 404);

    let response = server.get("/SurfaceLayers/abc").await;
    response.assert_status_bad_request();
    assert_error(&response.json(), 400);
}

#[tokio::test]
async fn test_info_reports_capabilities() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let body: Value = server.get("/Info").await.json();
    assert_eq!(body["interpolationCount"], 100);
    assert_eq!(body["maxDataValues"], 10000);
    let capabilities = body["capabilities"].as_array().unwrap();
    assert!(capabilities.contains(&json!("Elevation at lon-lat")));
    assert!(capabilities.contains(&json!("Elevations")));
    assert!(!capabilities.contains(&json!("Slope")));
}

#[tokio::test]
async fn test_help_and_schema() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let help: Value = server.get("/Help").await.json();
    assert!(help["Operations"]["GetSlope"]["inputs"]["units"].is_string());

    let schema: Value = server.get("/schema").await.json();
    assert!(schema["resources"].is_array());
}

#[tokio::test]
async fn test_elevation_at_lon_lat() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server
        .get("/SurfaceLayers/0/GetElevationAtLonLat")
        .add_query_param("lon", "7.5")
        .add_query_param("lat", "46.5")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let elevation = body["elevation"].as_f64().unwrap();
    assert!((elevation - 600.0).abs() < 0.5);
}

#[tokio::test]
async fn test_operation_name_case_insensitive() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server
        .get("/SurfaceLayers/0/getelevationatlonlat")
        .add_query_param("lon", "7.25")
        .add_query_param("lat", "46.75")
        .add_query_param("f", "pjson")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!((body["elevation"].as_f64().unwrap() - 300.0).abs() < 0.5);
}

#[tokio::test]
async fn test_elevation_missing_input() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server
        .get("/SurfaceLayers/0/GetElevationAtLonLat")
        .add_query_param("lon", "7.5")
        .await;
    response.assert_status_bad_request();
    assert_error(&response.json(), 400);
}

#[tokio::test]
async fn test_elevation_outside_tiles() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server
        .get("/SurfaceLayers/0/GetElevationAtLonLat")
        .add_query_param("lon", "20.5")
        .add_query_param("lat", "10.5")
        .await;
    assert_eq!(response.status_code().as_u16(), 422);
    assert_error(&response.json(), 422);
}

#[tokio::test]
async fn test_unsupported_format() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let response = server
        .get("/SurfaceLayers/0/GetElevationAtLonLat")
        .add_query_param("lon", "7.5")
        .add_query_param("lat", "46.5")
        .add_query_param("f", "html")
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_disabled_capability_forbidden() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    // Rejected before the missing geometry is noticed.
    let response = server.get("/SurfaceLayers/0/GetSlope").await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_error(&response.json(), 403);
}

#[tokio::test]
async fn test_unknown_operation() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::all());

    let response = server.get("/SurfaceLayers/0/GetTemperature").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_post_elevations_form() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::default());

    let geometries = json!([
        {"x": 7.5, "y": 46.5, "spatialReference": {"wkid": 4326}},
        {"foo": "bar"}
    ])
    .to_string();
    let response = server
        .post("/SurfaceLayers/0/GetElevations")
        .form(&[("geometries", geometries.as_str())])
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let results = body["geometries"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!((results[0]["z"].as_f64().unwrap() - 600.0).abs() < 0.5);
    assert_eq!(results[1], json!({"foo": "bar"}));
}

#[tokio::test]
async fn test_elevation_data_grid() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::all());

    let extent = json!({
        "xmin": 7.4, "ymin": 46.4, "xmax": 7.6, "ymax": 46.6,
        "spatialReference": {"wkid": 4326}
    })
    .to_string();

    let response = server
        .get("/SurfaceLayers/0/GetElevationData")
        .add_query_param("extent", &extent)
        .add_query_param("rows", "2")
        .add_query_param("columns", "3")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["nRows"], 2);
    assert_eq!(body["nCols"], 3);

    let response = server
        .get("/SurfaceLayers/0/GetElevationData")
        .add_query_param("extent", &extent)
        .add_query_param("rows", "101")
        .add_query_param("columns", "100")
        .await;
    assert_eq!(response.status_code().as_u16(), 413);
    assert_error(&response.json(), 413);
}

#[tokio::test]
async fn test_slope_when_enabled() {
    let temp_dir = create_data_dir();
    let server = create_test_server(&temp_dir, CapabilitySet::all());

    let response = server
        .get("/SurfaceLayers/0/GetSlope")
        .add_query_param("geometry", r#"{"x":7.5,"y":46.5,"spatialReference":{"wkid":4326}}"#)
        .add_query_param("units", "degrees")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let slope = body["slope"].as_f64().unwrap();
    // One metre per ~92.6 m sample spacing.
    assert!(slope > 0.0 && slope < 1.0);
    assert_eq!(body["units"], "Degrees");
}
