//! Factory parameter profiles embedded at compile time.
//!
//! Profiles are complete server configurations demonstrating common setups;
//! they are always available without external files.

use crate::{ConfigError, ServerConfig};

/// Names of the bundled factory profiles.
pub static FACTORY_PROFILE_NAMES: &[&str] = &["init", "resonant_drift", "sensor_lab"];

static FACTORY_PROFILES_TOML: &[(&str, &str)] = &[
    ("init", INIT_PROFILE),
    ("resonant_drift", RESONANT_DRIFT_PROFILE),
    ("sensor_lab", SENSOR_LAB_PROFILE),
];

/// Plain starting point: internal oscillator, linear downmix, adaptive off.
const INIT_PROFILE: &str = r#"
sample_rate = 48000
device_block_frames = 512
output_channels = 2

[phi]
source = "internal"
manual_phase = 0.0
manual_depth = 0.5
internal_rate_hz = 0.618034

[downmix]
strategy = "linear"

[adaptive]
enabled = false
k = 0.25
gamma = 0.1
target = 1.0
bias = 0.0

[latency]
calibrate_on_start = false
compensation_offset_ms = 0.0
"#;

/// Φ-weighted downmix with the adaptive loop holding criticality.
const RESONANT_DRIFT_PROFILE: &str = r#"
sample_rate = 48000
device_block_frames = 512
output_channels = 2

[phi]
source = "internal"
manual_phase = 0.0
manual_depth = 0.6
internal_rate_hz = 0.618034

[downmix]
strategy = "phi"

[adaptive]
enabled = true
k = 0.25
gamma = 0.1
target = 1.0
bias = 0.0

[latency]
calibrate_on_start = true
compensation_offset_ms = 0.0
"#;

/// External sensor drives Φ; spatial stereo image.
const SENSOR_LAB_PROFILE: &str = r#"
sample_rate = 48000
device_block_frames = 256
output_channels = 2

[phi]
source = "sensor"
manual_phase = 0.0
manual_depth = 0.5
internal_rate_hz = 0.618034

[downmix]
strategy = "spatial"

[adaptive]
enabled = false
k = 0.25
gamma = 0.1
target = 1.0
bias = 0.0

[latency]
calibrate_on_start = false
compensation_offset_ms = 0.0
"#;

/// Look up a factory profile by name.
pub fn get_factory_profile(name: &str) -> Result<ServerConfig, ConfigError> {
    let toml_source = FACTORY_PROFILES_TOML
        .iter()
        .find(|(profile_name, _)| *profile_name == name)
        .map(|(_, source)| *source)
        .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;
    Ok(toml::from_str(toml_source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_config;

    #[test]
    fn test_every_factory_profile_parses_and_validates() {
        for &name in FACTORY_PROFILE_NAMES {
            let profile = get_factory_profile(name)
                .unwrap_or_else(|e| panic!("profile '{name}' failed: {e}"));
            validate_config(&profile)
                .unwrap_or_else(|e| panic!("profile '{name}' invalid: {e}"));
        }
    }

    #[test]
    fn test_unknown_profile_rejected() {
        assert!(matches!(
            get_factory_profile("nonsense"),
            Err(ConfigError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_resonant_drift_enables_adaptive() {
        let profile = get_factory_profile("resonant_drift").unwrap();
        assert!(profile.adaptive.enabled);
        assert_eq!(profile.downmix.strategy, chroma_core::DownmixStrategy::Phi);
    }
}
