pub mod batch;
pub mod call;
pub mod layers;
pub mod query;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use surface::{
    CapabilitySet, DemCatalog, InputMap, LayerRegistry, PlanarEngine, ResourceRouter,
    SurfaceConfig,
};

/// A router over the layers of one data directory.
pub struct Session {
    pub router: ResourceRouter,
    pub capabilities: CapabilitySet,
}

impl Session {
    pub fn open(data_dir: Option<PathBuf>, cache_size: u64, capabilities: &str) -> Result<Self> {
        let dir = data_dir.context(
            "SURFACE_DATA_DIR environment variable not set. Use --data-dir or set SURFACE_DATA_DIR",
        )?;
        if !dir.exists() {
            bail!("Data directory does not exist: {}", dir.display());
        }

        let capabilities = CapabilitySet::parse(capabilities).context("Invalid capabilities")?;
        let config = SurfaceConfig::from_env().context("Invalid surface configuration")?;
        let catalog = DemCatalog::open_dir(&dir, cache_size)
            .with_context(|| format!("Failed to open data directory {}", dir.display()))?;

        Ok(Self {
            router: ResourceRouter::new(
                LayerRegistry::discover(&catalog),
                Arc::new(PlanarEngine::new()),
                config,
            ),
            capabilities,
        })
    }

    /// Dispatch a request, turning an error envelope into an error.
    pub fn call(&self, path: &str, op: Option<&str>, inputs: &InputMap) -> Result<Value> {
        let response = self
            .router
            .dispatch(&self.capabilities, path, op, None, inputs);
        let body = response.to_json().context("Malformed response body")?;
        if !response.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("request failed");
            bail!("{} ({})", message, response.status);
        }
        Ok(body)
    }
}
