use super::nonbonded::{
    MixingRule, NonbondedScales, NonperiodicElectrostaticsMethod, NonperiodicVdwMethod,
    PeriodicElectrostaticsMethod, PeriodicVdwMethod,
};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Nonbonded defaults loadable from a TOML settings file.
///
/// These seed the vdW and Electrostatics collections when the assigning
/// engine does not dictate its own; every field falls back to the built-in
/// convention when omitted from the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NonbondedSettings {
    /// Cutoff distance in Angstroms.
    pub cutoff: f64,
    /// Switching-function width in Angstroms; zero disables switching.
    pub switch_width: f64,
    pub mixing_rule: MixingRule,
    pub scale_12: f64,
    pub scale_13: f64,
    pub scale_14: f64,
    pub scale_15: f64,
    pub periodic_vdw_method: PeriodicVdwMethod,
    pub nonperiodic_vdw_method: NonperiodicVdwMethod,
    pub periodic_electrostatics_method: PeriodicElectrostaticsMethod,
    pub nonperiodic_electrostatics_method: NonperiodicElectrostaticsMethod,
}

impl Default for NonbondedSettings {
    fn default() -> Self {
        let scales = NonbondedScales::default();
        Self {
            cutoff: 9.0,
            switch_width: 1.0,
            mixing_rule: MixingRule::default(),
            scale_12: scales.scale_12,
            scale_13: scales.scale_13,
            scale_14: scales.scale_14,
            scale_15: scales.scale_15,
            periodic_vdw_method: PeriodicVdwMethod::default(),
            nonperiodic_vdw_method: NonperiodicVdwMethod::default(),
            periodic_electrostatics_method: PeriodicElectrostaticsMethod::default(),
            nonperiodic_electrostatics_method: NonperiodicElectrostaticsMethod::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

impl NonbondedSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| SettingsError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn scales(&self) -> NonbondedScales {
        NonbondedScales {
            scale_12: self.scale_12,
            scale_13: self.scale_13,
            scale_14: self.scale_14,
            scale_15: self.scale_15,
        }
    }
}
