//! Startup configuration: interpolation and grid-size settings plus the
//! capability labels that gate which operations are reachable.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SurfaceError};

/// Default number of vertices targeted when densifying a curve.
pub const DEFAULT_INTERPOLATION_COUNT: u32 = 100;

/// Default cap on `rows * columns` for elevation grids.
pub const DEFAULT_MAX_DATA_VALUES: u64 = 10_000;

/// Validated service configuration, read once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Target vertex count used to size the densification step.
    pub interpolation_count: u32,
    /// Maximum number of values a single elevation grid may contain.
    pub max_data_values: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            interpolation_count: DEFAULT_INTERPOLATION_COUNT,
            max_data_values: DEFAULT_MAX_DATA_VALUES,
        }
    }
}

impl SurfaceConfig {
    /// Create a configuration, rejecting values the pipeline cannot use.
    ///
    /// `interpolation_count` must be greater than 2 (the densification step
    /// divides by `interpolation_count - 2`) and `max_data_values` must be
    /// positive.
    pub fn new(interpolation_count: u32, max_data_values: u64) -> Result<Self> {
        if interpolation_count <= 2 {
            return Err(SurfaceError::config(format!(
                "interpolationCount must be greater than 2 (got {})",
                interpolation_count
            )));
        }
        if max_data_values == 0 {
            return Err(SurfaceError::config("maxDataValues must be positive"));
        }
        Ok(Self {
            interpolation_count,
            max_data_values,
        })
    }

    /// Build a configuration from a property bag using the service property
    /// names `interpolationCount` and `maxDataValues`.
    ///
    /// Both properties are required.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let interpolation_count = required_property(properties, "interpolationCount")?;
        let max_data_values = required_property(properties, "maxDataValues")?;
        Self::new(interpolation_count, max_data_values)
    }

    /// Build a configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SURFACE_INTERPOLATION_COUNT` | 100 |
    /// | `SURFACE_MAX_DATA_VALUES` | 10000 |
    ///
    /// Variables that are set but do not parse are an error rather than
    /// silently replaced by the default.
    pub fn from_env() -> Result<Self> {
        let interpolation_count =
            env_or_default("SURFACE_INTERPOLATION_COUNT", DEFAULT_INTERPOLATION_COUNT)?;
        let max_data_values = env_or_default("SURFACE_MAX_DATA_VALUES", DEFAULT_MAX_DATA_VALUES)?;
        Self::new(interpolation_count, max_data_values)
    }
}

fn required_property<T: FromStr>(properties: &HashMap<String, String>, name: &str) -> Result<T> {
    let raw = properties
        .get(name)
        .ok_or_else(|| SurfaceError::config(format!("missing property '{}'", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| SurfaceError::config(format!("property '{}' is not a number: {}", name, raw)))
}

fn env_or_default<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SurfaceError::config(format!("{} is not a number: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// A named permission gating whether an operation is externally reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    ElevationAtLonLat,
    Elevations,
    ElevationData,
    LineOfSight,
    SteepestPath,
    Contour,
    Slope,
    Aspect,
    SurfaceLength,
    Normal,
    Locate,
}

impl Capability {
    /// Every capability, in the order the service advertises them.
    pub const ALL: [Capability; 11] = [
        Capability::ElevationAtLonLat,
        Capability::Elevations,
        Capability::ElevationData,
        Capability::LineOfSight,
        Capability::SteepestPath,
        Capability::Contour,
        Capability::Slope,
        Capability::Aspect,
        Capability::SurfaceLength,
        Capability::Normal,
        Capability::Locate,
    ];

    /// The fixed label used in configuration and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Capability::ElevationAtLonLat => "Elevation at lon-lat",
            Capability::Elevations => "Elevations",
            Capability::ElevationData => "Elevation data",
            Capability::LineOfSight => "Line of sight",
            Capability::SteepestPath => "Steepest path",
            Capability::Contour => "Contour",
            Capability::Slope => "Slope",
            Capability::Aspect => "Aspect",
            Capability::SurfaceLength => "Surface length",
            Capability::Normal => "Normal",
            Capability::Locate => "Locate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Capability {
    type Err = SurfaceError;

    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim();
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(label))
            .ok_or_else(|| SurfaceError::config(format!("unknown capability '{}'", label)))
    }
}

/// The capability labels enabled for a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    enabled: BTreeSet<Capability>,
}

impl Default for CapabilitySet {
    /// Lookups only: `Elevation at lon-lat` and `Elevations`.
    fn default() -> Self {
        Self::from_iter([Capability::ElevationAtLonLat, Capability::Elevations])
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            enabled: iter.into_iter().collect(),
        }
    }
}

impl CapabilitySet {
    /// Every capability enabled.
    pub fn all() -> Self {
        Self::from_iter(Capability::ALL)
    }

    /// Nothing enabled.
    pub fn none() -> Self {
        Self::from_iter([])
    }

    /// Parse a comma-separated list of labels, e.g.
    /// `"Elevation at lon-lat,Elevations,Slope"`. The keyword `all` enables
    /// every capability. Unknown labels are rejected.
    pub fn parse(list: &str) -> Result<Self> {
        if list.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        list.split(',')
            .filter(|label| !label.trim().is_empty())
            .map(str::parse)
            .collect()
    }

    /// Read `SURFACE_CAPABILITIES`, falling back to [`CapabilitySet::default`].
    pub fn from_env() -> Result<Self> {
        match std::env::var("SURFACE_CAPABILITIES") {
            Ok(list) => Self::parse(&list),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.enabled.iter().copied()
    }

    /// Labels of the enabled capabilities.
    pub fn labels(&self) -> Vec<&'static str> {
        self.iter().map(|c| c.label()).collect()
    }
}
