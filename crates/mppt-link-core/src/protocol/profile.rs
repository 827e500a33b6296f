//! Device profiles
//!
//! Controllers seen on the bench differ only in a handful of fixed bytes, so
//! everything device-specific lives here as data rather than in code paths.

use serde::{Deserialize, Serialize};

use super::{ProtocolError, DEFAULT_POLL_INTERVAL_MS, HOST_ADDRESS, MIN_TEMPLATE_LEN};

/// First session-opening template, as captured from the vendor tool
const HANDSHAKE_A: [u8; 12] = [
    0x55, 0x0E, 0x04, 0x66, 0xAB, 0x00, 0x01, 0x00, 0x40, 0x00, 0x01, 0x01,
];

const HANDSHAKE_B: [u8; 12] = [
    0x55, 0x0E, 0x04, 0x66, 0xAB, 0x00, 0x02, 0x00, 0x40, 0x00, 0x02, 0x01,
];

const POLL: [u8; 12] = [
    0x55, 0x0E, 0x04, 0x66, 0xAB, 0x00, 0x03, 0x00, 0x40, 0x00, 0x03, 0x01,
];

/// Fixed bytes between the sequence field and the setpoint
const COMMAND_PREFIX: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Everything the session needs to know about one controller variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Profile name (used for built-in lookup and logging)
    pub name: String,

    /// Talker address the host uses in every frame it sends
    pub host_address: u8,

    /// The two templates sent, in order, to open a session
    pub handshake_templates: Vec<Vec<u8>>,

    /// Template for the periodic telemetry poll
    pub poll_template: Vec<u8>,

    /// Four constant bytes that precede the setpoint in command frames
    pub command_prefix: [u8; 4],

    /// Four opaque per-device bytes that follow the setpoint.
    /// The last one (frame offset 19) differs between units.
    pub command_trailer: [u8; 4],

    /// Final byte of the command frame
    pub enable_flag: u8,

    /// Poll period in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::unit(0x71, "unit-a")
    }
}

impl DeviceProfile {
    fn unit(device_byte: u8, name: &str) -> Self {
        Self {
            name: name.to_string(),
            host_address: HOST_ADDRESS,
            handshake_templates: vec![HANDSHAKE_A.to_vec(), HANDSHAKE_B.to_vec()],
            poll_template: POLL.to_vec(),
            command_prefix: COMMAND_PREFIX,
            command_trailer: [0x00, 0x00, 0x00, device_byte],
            enable_flag: 0x01,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Names of the built-in profiles
    pub fn builtin_names() -> &'static [&'static str] {
        &["unit-a", "unit-b"]
    }

    /// Look up a built-in profile by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "unit-a" => Some(Self::unit(0x71, "unit-a")),
            "unit-b" => Some(Self::unit(0x8F, "unit-b")),
            _ => None,
        }
    }

    /// Check the profile can actually produce frames
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.handshake_templates.len() != 2 {
            return Err(ProtocolError::Config(format!(
                "profile '{}' needs exactly 2 handshake templates, has {}",
                self.name,
                self.handshake_templates.len()
            )));
        }

        let templates = self
            .handshake_templates
            .iter()
            .chain(std::iter::once(&self.poll_template));
        for template in templates {
            if template.len() < MIN_TEMPLATE_LEN {
                return Err(ProtocolError::Config(format!(
                    "profile '{}' has a {}-byte template, minimum is {}",
                    self.name,
                    template.len(),
                    MIN_TEMPLATE_LEN
                )));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ProtocolError::Config(format!(
                "profile '{}' has a zero poll interval",
                self.name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_are_valid() {
        for name in DeviceProfile::builtin_names() {
            let profile = DeviceProfile::builtin(name).expect("builtin should exist");
            assert_eq!(profile.name, *name);
            profile.validate().expect("builtin should validate");
        }
        assert!(DeviceProfile::builtin("nope").is_none());
    }

    #[test]
    fn test_units_differ_only_in_device_byte() {
        let a = DeviceProfile::builtin("unit-a").unwrap();
        let b = DeviceProfile::builtin("unit-b").unwrap();
        assert_eq!(a.command_trailer[3], 0x71);
        assert_eq!(b.command_trailer[3], 0x8F);
        assert_eq!(a.handshake_templates, b.handshake_templates);
        assert_eq!(a.poll_template, b.poll_template);
    }

    #[test]
    fn test_short_template_fails_validation() {
        let mut profile = DeviceProfile::default();
        profile.poll_template = vec![0x55, 0x0E, 0x04];
        assert!(matches!(profile.validate(), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let profile: DeviceProfile =
            serde_json::from_str(r#"{ "name": "bench", "poll_interval_ms": 250 }"#).unwrap();
        assert_eq!(profile.name, "bench");
        assert_eq!(profile.poll_interval_ms, 250);
        assert_eq!(profile.host_address, HOST_ADDRESS);
        assert_eq!(profile.handshake_templates.len(), 2);
    }
}
