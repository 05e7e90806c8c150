//! Pipeline configuration.
//!
//! Every parameter has a default carrying the NSIDC constants, so an empty
//! TOML file (or none at all) yields the standard processing chain.

use crate::core::decoder::GridLayout;
use crate::core::noise::{AreaThresholds, NoiseSuppressionParams};
use crate::core::sentinel::SentinelPolicy;
use crate::core::temporal_filter::{CoastalFilterParams, ConsecutiveDayParams, ZoneWindow};
use crate::types::{GridGeolocation, IceError, IceResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Final reprojection of the written products
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprojectionParams {
    pub target_epsg: u32,
    /// Output pixel size in target units
    pub resolution: f64,
}

impl Default for ReprojectionParams {
    fn default() -> Self {
        // North Pole LAEA Europe
        Self {
            target_epsg: 3575,
            resolution: 25_000.0,
        }
    }
}

/// Complete parameter set of a processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub layout: GridLayout,
    pub policy: SentinelPolicy,
    /// Geolocation of the daily charts, which carry none themselves
    pub geolocation: GridGeolocation,
    /// `None` skips coastal-error suppression
    pub coastal_filter: Option<CoastalFilterParams>,
    /// `None` skips consecutive-day confirmation
    pub consecutive_day_filter: Option<ConsecutiveDayParams>,
    pub noise: NoiseSuppressionParams,
    /// `None` leaves products in the grid projection
    pub reprojection: Option<ReprojectionParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layout: GridLayout::default(),
            policy: SentinelPolicy::default(),
            geolocation: GridGeolocation::default(),
            coastal_filter: Some(CoastalFilterParams::default()),
            consecutive_day_filter: None,
            noise: NoiseSuppressionParams::default(),
            reprojection: Some(ReprojectionParams::default()),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> IceResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            IceError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> IceResult<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| IceError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> IceResult<String> {
        toml::to_string(self).map_err(|e| IceError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> IceResult<()> {
        if self.layout.height == 0 || self.layout.width == 0 {
            return Err(IceError::Config(format!(
                "grid layout must be non-empty, got {}x{}",
                self.layout.height, self.layout.width
            )));
        }
        if self.policy.is_sentinel(self.policy.ice_threshold) {
            return Err(IceError::Config(format!(
                "ice threshold {} is a sentinel code",
                self.policy.ice_threshold
            )));
        }

        if let Some(coastal) = &self.coastal_filter {
            validate_window("coastal", &coastal.coastal)?;
            validate_window("enclosed sea", &coastal.enclosed_sea)?;
            let zones = [coastal.coastal.zone, coastal.enclosed_sea.zone, coastal.never_ice_zone];
            if zones.contains(&0) {
                return Err(IceError::Config("zone id 0 is reserved for normal ocean".to_string()));
            }
            if zones[0] == zones[1] || zones[0] == zones[2] || zones[1] == zones[2] {
                return Err(IceError::Config(format!("zone ids must be distinct, got {:?}", zones)));
            }
        }

        let noise = &self.noise;
        if noise.sieve.threshold == 0 {
            return Err(IceError::Config("sieve threshold must be at least 1".to_string()));
        }
        validate_thresholds("maximum", &noise.maximum)?;
        validate_thresholds("minimum", &noise.minimum)?;

        if let Some(reprojection) = &self.reprojection {
            if !(reprojection.resolution > 0.0) {
                return Err(IceError::Config(format!(
                    "reprojection resolution must be positive, got {}",
                    reprojection.resolution
                )));
            }
        }
        Ok(())
    }
}

fn validate_window(name: &str, window: &ZoneWindow) -> IceResult<()> {
    let size = 2 * window.day_range as usize + 1;
    if window.min_ice_days > size {
        return Err(IceError::Config(format!(
            "{} filter needs {} ice days in a {}-day window",
            name, window.min_ice_days, size
        )));
    }
    Ok(())
}

fn validate_thresholds(name: &str, thresholds: &AreaThresholds) -> IceResult<()> {
    for value in [thresholds.primary, thresholds.enclosed_sea].into_iter().flatten() {
        if !(value >= 0.0) {
            return Err(IceError::Config(format!(
                "{} area threshold must be non-negative, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sieve::Connectivity;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.layout.expected_len(), 300 + 448 * 304);
        assert!(config.consecutive_day_filter.is_none());
        assert_eq!(config.noise.maximum.primary, Some(1e10));
        assert_eq!(config.noise.maximum.enclosed_sea, Some(1e9));
        assert_eq!(config.noise.minimum.primary, Some(10.0));
        assert_eq!(config.noise.minimum.enclosed_sea, None);
    }

    #[test]
    fn test_defaults_survive_toml() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [consecutive_day_filter]
            day_range = 2

            [noise.sieve]
            threshold = 5
            connectivity = "Eight"

            [noise.maximum]
            enclosed_sea = 2e9
            "#,
        )
        .unwrap();

        assert_eq!(config.consecutive_day_filter, Some(ConsecutiveDayParams { day_range: 2 }));
        assert_eq!(config.noise.sieve.threshold, 5);
        assert_eq!(config.noise.sieve.connectivity, Connectivity::Eight);
        assert_eq!(config.noise.maximum.primary, Some(1e10));
        assert_eq!(config.noise.maximum.enclosed_sea, Some(2e9));
        assert_eq!(config.layout, GridLayout::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let too_strict = r#"
            [coastal_filter.coastal]
            zone = 1
            day_range = 1
            min_ice_days = 4
        "#;
        assert!(matches!(
            PipelineConfig::from_toml_str(too_strict),
            Err(IceError::Config(_))
        ));

        let mut config = PipelineConfig::default();
        config.policy.ice_threshold = 254;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.noise.minimum.primary = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_toml_file("/nonexistent/icepersist.toml").unwrap_err();
        assert!(matches!(err, IceError::Config(_)));
    }
}
