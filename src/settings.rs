// src/settings.rs
//
// =============================================================================
// NMR BATCH: ACQUISITION SETTINGS (v 0.1 )
// =============================================================================
//
// `settings.toml` has three sections:
//
//   [nmr]       instrument setup (rack layout, shim sample, timings)
//   [defaults]  values used whenever a batch entry leaves something out
//   [bridge]    optional, how to reach the spectrometer helper process
//
// Timings are given in seconds.

use crate::drivers::bridge::BridgeConfig;
use crate::error::AcquisitionError;
use crate::racks::RackLayout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub nmr: NmrSetup,
    pub defaults: NmrDefaults,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmrSetup {
    pub rack_layout: String,
    /// Gripper position holding the shim standard.
    pub shim_sample: u32,
    /// Maximum time between two shim procedures.
    pub reshim_time: u64,
    /// Duration of one shim procedure.
    pub shim_time: u64,
    /// Settle time after every sample change.
    pub wait_time: u64,
    pub samples_file: PathBuf,
}

impl NmrSetup {
    pub fn reshim_interval(&self) -> Duration {
        Duration::from_secs(self.reshim_time)
    }

    pub fn shim_duration(&self) -> Duration {
        Duration::from_secs(self.shim_time)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_secs(self.wait_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmrDefaults {
    pub parameter_set: String,
    pub num_scans: u32,
    pub pp_threshold: f64,
    pub field_presat: f64,
    pub l30: f64,
    pub solvent: String,
    pub sample_info: Value,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let settings = Self::from_toml(&raw)
            .with_context(|| format!("Invalid settings file {:?}", path))?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw).context("Failed to parse settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that parsing alone cannot express.
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        RackLayout::from_name(&self.nmr.rack_layout)?;

        if self.nmr.reshim_time == 0 {
            return Err(AcquisitionError::InvalidConfiguration(
                "nmr.reshim_time must be greater than zero".into(),
            ));
        }
        if self.defaults.num_scans == 0 {
            return Err(AcquisitionError::InvalidConfiguration(
                "defaults.num_scans must be a positive integer".into(),
            ));
        }
        if self.defaults.parameter_set.trim().is_empty() {
            return Err(AcquisitionError::InvalidConfiguration(
                "defaults.parameter_set must not be empty".into(),
            ));
        }
        if self.bridge.program.trim().is_empty() {
            return Err(AcquisitionError::InvalidConfiguration(
                "bridge.program must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[nmr]
rack_layout = "PAL"
shim_sample = 1
reshim_time = 14400
shim_time = 600
wait_time = 30
samples_file = "samples.toml"

[defaults]
parameter_set = "PROTON"
num_scans = 16
pp_threshold = 1
field_presat = 10
l30 = 12
solvent = "DMSO"
sample_info = ""
"#;

    #[test]
    fn test_parses_example_settings() {
        let settings = Settings::from_toml(EXAMPLE).unwrap();
        assert_eq!(settings.nmr.shim_sample, 1);
        assert_eq!(settings.nmr.reshim_interval(), Duration::from_secs(4 * 3600));
        assert_eq!(settings.nmr.settle_time(), Duration::from_secs(30));
        assert_eq!(settings.defaults.num_scans, 16);
        assert_eq!(settings.defaults.l30, 12.0);
        // No [bridge] section: defaults apply.
        assert_eq!(settings.bridge, BridgeConfig::default());
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let without_defaults = EXAMPLE.split("[defaults]").next().unwrap();
        assert!(Settings::from_toml(without_defaults).is_err());
    }

    #[test]
    fn test_rejects_unknown_rack_layout() {
        let raw = EXAMPLE.replace(r#"rack_layout = "PAL""#, r#"rack_layout = "Bruker""#);
        let err = Settings::from_toml(&raw).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AcquisitionError>(),
            Some(AcquisitionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_zero_scans() {
        let raw = EXAMPLE.replace("num_scans = 16", "num_scans = 0");
        assert!(Settings::from_toml(&raw).is_err());
    }

    #[test]
    fn test_bridge_section_overrides_defaults() {
        let raw = format!(
            "{EXAMPLE}\n[bridge]\nprogram = \"./bridge.sh\"\nargs = [\"--port\", \"8080\"]\n"
        );
        let settings = Settings::from_toml(&raw).unwrap();
        assert_eq!(settings.bridge.program, "./bridge.sh");
        assert_eq!(settings.bridge.args, vec!["--port", "8080"]);
        assert_eq!(settings.bridge.handshake_timeout, 30);
    }
}
