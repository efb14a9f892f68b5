//! Render settings, persisted as JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// All render settings.
///
/// Every field has a default, so partial JSON files load fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub integrator: IntegratorSettings,
    pub film: FilmSettings,
    pub adaptive: AdaptiveSettings,
    pub scheduler: SchedulerSettings,
    pub device: DeviceSettings,
    pub session: SessionSettings,
}

/// Path termination, clamping and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// Bounces before Russian roulette may terminate a path.
    pub min_bounce: u16,
    pub max_bounce: u16,
    pub max_diffuse_bounce: u16,
    pub max_glossy_bounce: u16,
    pub max_transmission_bounce: u16,
    pub max_volume_bounce: u16,
    pub transparent_min_bounce: u16,
    pub transparent_max_bounce: u16,
    /// Max component of a direct contribution, 0 disables.
    pub sample_clamp_direct: f32,
    /// Max component of an indirect contribution, 0 disables.
    pub sample_clamp_indirect: f32,
    /// Light samples below this contribution are stochastically dropped.
    pub light_threshold: f32,
    /// Glossy blur after blurry bounces, 0 disables.
    pub filter_glossy: f32,
    /// Pixel filter width in pixels.
    pub filter_width: f32,
    pub seed: u32,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            min_bounce: 3,
            max_bounce: 12,
            max_diffuse_bounce: 4,
            max_glossy_bounce: 4,
            max_transmission_bounce: 12,
            max_volume_bounce: 2,
            transparent_min_bounce: 8,
            transparent_max_bounce: 8,
            sample_clamp_direct: 0.0,
            sample_clamp_indirect: 10.0,
            light_threshold: 0.01,
            filter_glossy: 1.0,
            filter_width: 1.5,
            seed: 0,
        }
    }
}

/// Film options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmSettings {
    /// Background seen directly by the camera is transparent.
    pub transparent: bool,
    pub exposure: f32,
    /// Allocate emission/background/diffuse/glossy/transmission/volume passes.
    pub light_passes: bool,
    pub depth_pass: bool,
    /// Gather denoising albedo and normal.
    pub denoising_passes: bool,
}

impl Default for FilmSettings {
    fn default() -> Self {
        Self {
            transparent: false,
            exposure: 1.0,
            light_passes: false,
            depth_pass: false,
            denoising_passes: false,
        }
    }
}

/// Adaptive sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    /// Noise level below which a pixel stops receiving samples.
    pub threshold: f32,
    /// Samples before the first convergence check, 0 picks one from the threshold.
    pub min_samples: u32,
    /// Samples between convergence checks.
    pub step: u32,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.01,
            min_samples: 0,
            step: 4,
        }
    }
}

/// Work tile shape. Zero means "pick automatically".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_samples: u32,
}

/// Reference CPU device options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Number of CPU devices (one queue thread each).
    pub num_devices: usize,
    /// Path states in flight per device.
    pub max_num_path_states: usize,
    /// Run each kernel across lanes with rayon.
    pub parallel_lanes: bool,
    /// Sort lanes by shader before surface shading.
    pub sort_by_shader: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            num_devices: 1,
            max_num_path_states: 1 << 14,
            parallel_lanes: true,
            sort_by_shader: true,
        }
    }
}

/// Largest sample count; sample indices are stored as `u16` in path states.
pub const MAX_SAMPLES: u32 = u16::MAX as u32;

/// Render request defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Samples per pixel, at most [`MAX_SAMPLES`].
    pub samples: u32,
    pub width: u32,
    pub height: u32,
    /// Minimum time between progress callbacks.
    pub update_interval_in_seconds: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            samples: 16,
            width: 320,
            height: 240,
            update_interval_in_seconds: 1.0,
        }
    }
}

impl Settings {
    /// Default location: `<config dir>/pathtrace/settings.json`.
    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("pathtrace").join("settings.json")
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::SettingsNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(path) {
            Err(Error::SettingsNotFound(path)) => {
                tracing::debug!("no settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the integrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &'static str, reason: &str| {
            Err(Error::InvalidSetting {
                name,
                reason: reason.to_string(),
            })
        };

        let it = &self.integrator;
        if it.transparent_min_bounce > it.transparent_max_bounce {
            return invalid("integrator.transparent_min_bounce", "exceeds transparent_max_bounce");
        }
        for (name, value) in [
            ("integrator.sample_clamp_direct", it.sample_clamp_direct),
            ("integrator.sample_clamp_indirect", it.sample_clamp_indirect),
            ("integrator.light_threshold", it.light_threshold),
            ("integrator.filter_glossy", it.filter_glossy),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return invalid(name, "must be a finite non-negative number");
            }
        }
        if !(it.filter_width > 0.0) {
            return invalid("integrator.filter_width", "must be positive");
        }
        if !(self.film.exposure >= 0.0) {
            return invalid("film.exposure", "must be non-negative");
        }
        if self.adaptive.enabled {
            if !(self.adaptive.threshold > 0.0) {
                return invalid("adaptive.threshold", "must be positive");
            }
            if self.adaptive.step == 0 {
                return invalid("adaptive.step", "must be at least 1");
            }
        }
        if self.device.num_devices == 0 {
            return invalid("device.num_devices", "must be at least 1");
        }
        if self.device.max_num_path_states == 0 {
            return invalid("device.max_num_path_states", "must be at least 1");
        }
        let interval = self.session.update_interval_in_seconds;
        if !(interval >= 0.0) || !interval.is_finite() {
            return invalid("session.update_interval_in_seconds", "must be a finite non-negative number");
        }
        if self.session.samples > MAX_SAMPLES {
            return invalid("session.samples", "must not exceed 65535");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "integrator": { "max_bounce": 3 }, "film": { "transparent": true } }"#).unwrap();
        assert_eq!(settings.integrator.max_bounce, 3);
        assert_eq!(settings.integrator.min_bounce, IntegratorSettings::default().min_bounce);
        assert!(settings.film.transparent);
        assert_eq!(settings.session, SessionSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.device.max_num_path_states = 0;
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { name: "device.max_num_path_states", .. })
        ));

        let mut settings = Settings::default();
        settings.integrator.sample_clamp_indirect = f32::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.adaptive.enabled = true;
        settings.adaptive.step = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_session() {
        let mut settings = Settings::default();
        settings.session.update_interval_in_seconds = f64::INFINITY;
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { name: "session.update_interval_in_seconds", .. })
        ));

        let mut settings = Settings::default();
        settings.session.samples = MAX_SAMPLES;
        settings.validate().unwrap();
        settings.session.samples = MAX_SAMPLES + 1;
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { name: "session.samples", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(Settings::load(&path), Err(Error::SettingsNotFound(_))));
        assert_eq!(Settings::load_or_default(&path).unwrap(), Settings::default());
    }
}
