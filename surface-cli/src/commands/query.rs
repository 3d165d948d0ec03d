use anyhow::{Context, Result};
use serde::Serialize;
use surface::InputMap;

use super::Session;

#[derive(Serialize)]
struct ElevationResponse {
    layer: i64,
    lon: f64,
    lat: f64,
    elevation: Option<f64>,
}

pub fn run(session: &Session, layer: i64, lon: f64, lat: f64, json: bool) -> Result<()> {
    let inputs = InputMap::from_pairs([("lon", lon.to_string()), ("lat", lat.to_string())]);
    let body = session
        .call(
            &format!("SurfaceLayers/{}/GetElevationAtLonLat", layer),
            None,
            &inputs,
        )
        .context("Failed to get elevation")?;

    // Non-finite elevations come back as the string "NaN".
    let elevation = body["elevation"].as_f64();

    if json {
        let response = ElevationResponse {
            layer,
            lon,
            lat,
            elevation,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        match elevation {
            Some(elev) => println!("{:.2}", elev),
            None => println!("void"),
        }
    }

    Ok(())
}
