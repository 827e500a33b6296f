//! Link configuration
//!
//! One JSON file holds the device profile, the session settings and the
//! capture settings. Every field is optional; missing fields take defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::datalog::CaptureConfig;
use crate::protocol::{DeviceProfile, ProtocolError};
use crate::session::SessionConfig;

/// Complete configuration for the link tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Controller variant
    pub profile: DeviceProfile,
    /// Session settings
    pub session: SessionConfig,
    /// Capture settings
    pub capture: CaptureConfig,
}

impl LinkConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), profile = %config.profile.name, "loaded config");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_json(content: &str) -> Result<Self, ProtocolError> {
        let config: LinkConfig =
            serde_json::from_str(content).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON (useful as a starting template)
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Check the profile, session and capture sections
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.profile.validate()?;
        if self.session.baud_rate == 0 || self.capture.baud_rate == 0 {
            return Err(ProtocolError::Config("baud rate must be non-zero".into()));
        }
        if self.capture.read_window_ms == 0 {
            return Err(ProtocolError::Config("capture read window must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChecksumPolicy;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(LinkConfig::from_json("{}").unwrap(), LinkConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = LinkConfig::from_json(
            r#"{
                "session": { "port_name": "/dev/ttyUSB0", "checksum_policy": "permissive" },
                "profile": { "poll_interval_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.port_name, "/dev/ttyUSB0");
        assert_eq!(config.session.checksum_policy, ChecksumPolicy::Permissive);
        assert_eq!(config.session.initial_sequence, 1);
        assert_eq!(config.profile.poll_interval_ms, 250);
        assert_eq!(config.profile.command_trailer[3], 0x71);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let err = LinkConfig::from_json(r#"{ "profile": { "poll_template": [85, 14] } }"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            LinkConfig::from_json("{ not json"),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "capture": {{ "ports": ["COM3"] }} }}"#).unwrap();

        let config = LinkConfig::load(file.path()).unwrap();
        assert_eq!(config.capture.ports, vec!["COM3".to_string()]);

        let round = LinkConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round, config);
    }
}
