use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::messages::ControlPanelButton;

/// Top-level agent configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub webrtc: WebrtcConfig,
    #[serde(default)]
    pub confui: ConfUiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device id reported to the operator
    #[serde(default = "default_device_id")]
    pub id: String,
    /// Port the operator advertises for direct client file access
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Host TCP port of the ADB server proxied over `adb-channel`
    #[serde(default = "default_adb_port")]
    pub adb_port: u16,
    /// Host TCP port of the HCI proxy behind `bluetooth-channel`
    #[serde(default = "default_bluetooth_port")]
    pub bluetooth_port: u16,
    /// Emulated displays, in stream order (`display_0`, `display_1`, ...)
    #[serde(default = "default_displays")]
    pub displays: Vec<DisplayConfig>,
    /// Hardware description forwarded verbatim in the register message
    #[serde(default)]
    pub hardware: BTreeMap<String, String>,
    /// Extra buttons for the browser control panel
    #[serde(default)]
    pub control_panel_buttons: Vec<ControlPanelButton>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_touch")]
    pub touch: bool,
}

/// How the operator's TLS identity is checked on the signaling socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityLevel {
    /// Plain ws://
    None,
    /// TLS without certificate verification (local development operators)
    AllowSelfSigned,
    /// TLS against the system trust store
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Operator WebSocket URL, e.g. "wss://operator:8443/register_device"
    #[serde(default = "default_operator_url")]
    pub url: String,
    #[serde(default = "default_security")]
    pub security: SecurityLevel,
    /// PEM certificate to add to the trust store (strict mode only)
    pub pinned_cert: Option<String>,
    /// Connection attempts during initial registration
    #[serde(default = "default_registration_retries")]
    pub registration_retries: u32,
    /// Connection attempts after an established connection drops
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: u32,
    /// First retry delay; doubles on every failed attempt
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// Upper bound on the doubled retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebrtcConfig {
    /// UDP port range for ICE, inclusive
    #[serde(default = "default_port_range")]
    pub udp_port_range: (u16, u16),
    /// TCP port range for ICE, inclusive
    #[serde(default = "default_port_range")]
    pub tcp_port_range: (u16, u16),
    /// Initial encoder bitrate in kbps. Libraries that ramp up from their
    /// ~300 kbps default drop the first several encoded frames.
    #[serde(default = "default_start_bitrate_kbps")]
    pub start_bitrate_kbps: u32,
    /// ICE servers used in addition to the operator-supplied list
    #[serde(default)]
    pub ice_servers: Vec<crate::messages::IceServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfUiConfig {
    /// Unix socket the guest HAL connects to
    #[serde(default = "default_hal_socket")]
    pub hal_socket: String,
    /// Interval after a prompt appears during which user input is ignored
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Path to the 32-byte auth-token key file. Absent = test key.
    pub auth_token_key: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            port: default_device_port(),
            adb_port: default_adb_port(),
            bluetooth_port: default_bluetooth_port(),
            displays: default_displays(),
            hardware: BTreeMap::new(),
            control_panel_buttons: Vec::new(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_operator_url(),
            security: default_security(),
            pinned_cert: None,
            registration_retries: default_registration_retries(),
            reconnect_retries: default_reconnect_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for WebrtcConfig {
    fn default() -> Self {
        Self {
            udp_port_range: default_port_range(),
            tcp_port_range: default_port_range(),
            start_bitrate_kbps: default_start_bitrate_kbps(),
            ice_servers: Vec::new(),
        }
    }
}

impl Default for ConfUiConfig {
    fn default() -> Self {
        Self {
            hal_socket: default_hal_socket(),
            grace_period_ms: default_grace_period_ms(),
            auth_token_key: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl AgentConfig {
    /// Load a TOML config file; missing sections fall back to defaults.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Validate the configuration, returning all issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal) or "WARNING:" (advisory).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.device.id.is_empty() {
            issues.push("ERROR: device.id must not be empty.".to_string());
        }
        if self.signaling.url.is_empty() {
            issues.push("ERROR: signaling.url must not be empty.".to_string());
        }
        match self.signaling.security {
            SecurityLevel::None => {
                if self.signaling.url.starts_with("wss://") {
                    issues.push(
                        "WARNING: signaling.security is 'none' but the URL is wss://; \
                         the connection will still use TLS without verification."
                            .to_string(),
                    );
                }
            }
            SecurityLevel::AllowSelfSigned | SecurityLevel::Strict => {
                if self.signaling.url.starts_with("ws://") {
                    issues.push(
                        "WARNING: TLS security requested for a ws:// URL; \
                         the handshake will be plaintext."
                            .to_string(),
                    );
                }
            }
        }
        if self.signaling.retry_initial_delay_ms == 0 {
            issues.push("ERROR: signaling.retry_initial_delay_ms must be at least 1.".to_string());
        }
        if self.signaling.retry_max_delay_ms < self.signaling.retry_initial_delay_ms {
            issues.push(format!(
                "ERROR: signaling.retry_max_delay_ms ({}) is below retry_initial_delay_ms ({}).",
                self.signaling.retry_max_delay_ms, self.signaling.retry_initial_delay_ms
            ));
        }

        for (name, (lo, hi)) in [
            ("udp_port_range", self.webrtc.udp_port_range),
            ("tcp_port_range", self.webrtc.tcp_port_range),
        ] {
            if lo > hi {
                issues.push(format!(
                    "ERROR: webrtc.{name} [{lo}, {hi}] is empty (lower bound above upper bound)."
                ));
            }
        }
        if self.webrtc.start_bitrate_kbps == 0 {
            issues.push("ERROR: webrtc.start_bitrate_kbps must be at least 1.".to_string());
        }

        if self.device.displays.is_empty() {
            issues.push("ERROR: device.displays must list at least one display.".to_string());
        }
        for (i, d) in self.device.displays.iter().enumerate() {
            if d.width == 0 || d.height == 0 || d.dpi == 0 {
                issues.push(format!(
                    "ERROR: device.displays[{i}] has a zero dimension ({}x{} @ {} dpi).",
                    d.width, d.height, d.dpi
                ));
            }
        }
        for (i, b) in self.device.control_panel_buttons.iter().enumerate() {
            if b.shell_command.is_some() && !b.device_states.is_empty() {
                issues.push(format!(
                    "ERROR: device.control_panel_buttons[{i}] ('{}') sets both \
                     shell_command and device_states.",
                    b.command
                ));
            }
        }

        if self.confui.hal_socket.is_empty() {
            issues.push("ERROR: confui.hal_socket must not be empty.".to_string());
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn default_device_id() -> String {
    "prism-device-0".to_string()
}

fn default_device_port() -> u16 {
    8443
}

fn default_adb_port() -> u16 {
    6520
}

fn default_bluetooth_port() -> u16 {
    7300
}

fn default_displays() -> Vec<DisplayConfig> {
    vec![DisplayConfig {
        width: 720,
        height: 1280,
        dpi: default_dpi(),
        touch: default_touch(),
    }]
}

fn default_dpi() -> u32 {
    320
}

fn default_touch() -> bool {
    true
}

fn default_operator_url() -> String {
    "ws://127.0.0.1:1443/register_device".to_string()
}

fn default_security() -> SecurityLevel {
    SecurityLevel::Strict
}

fn default_registration_retries() -> u32 {
    3
}

fn default_reconnect_retries() -> u32 {
    100
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_port_range() -> (u16, u16) {
    (15550, 15558)
}

fn default_start_bitrate_kbps() -> u32 {
    2000
}

fn default_hal_socket() -> String {
    "/tmp/prism_confui.sock".to_string()
}

fn default_grace_period_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.device.id, "prism-device-0");
        assert_eq!(config.signaling.registration_retries, 3);
        assert_eq!(config.signaling.reconnect_retries, 100);
        assert_eq!(config.signaling.retry_initial_delay_ms, 1000);
        assert_eq!(config.signaling.retry_max_delay_ms, 60_000);
        assert_eq!(config.signaling.security, SecurityLevel::Strict);
        assert_eq!(config.webrtc.udp_port_range, (15550, 15558));
        assert_eq!(config.webrtc.tcp_port_range, (15550, 15558));
        assert_eq!(config.webrtc.start_bitrate_kbps, 2000);
        assert_eq!(config.confui.grace_period_ms, 1000);
        assert_eq!(config.device.displays.len(), 1);
        assert_eq!(config.device.displays[0].dpi, 320);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn display_and_button_sections_parse() {
        let config: AgentConfig = toml::from_str(
            r#"
            [[device.displays]]
            width = 1080
            height = 2400
            dpi = 440

            [device.hardware]
            cpus = "4"
            ram = "4096"

            [[device.control_panel_buttons]]
            command = "web_fold"
            title = "Fold"
            icon_name = "laptop"
            [[device.control_panel_buttons.device_states]]
            lid_switch_open = false
            hinge_angle_value = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.device.displays[0].width, 1080);
        assert!(config.device.displays[0].touch);
        assert_eq!(config.device.hardware["cpus"], "4");
        let button = &config.device.control_panel_buttons[0];
        assert_eq!(button.device_states[0].lid_switch_open, Some(false));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn button_with_both_actions_rejected() {
        let config: AgentConfig = toml::from_str(
            r#"
            [[device.control_panel_buttons]]
            command = "bad"
            title = "Bad"
            icon_name = "warning"
            shell_command = "input keyevent 26"
            [[device.control_panel_buttons.device_states]]
            lid_switch_open = true
            "#,
        )
        .unwrap();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("control_panel_buttons")));
    }

    #[test]
    fn security_level_names_are_kebab_case() {
        let config: AgentConfig = toml::from_str(
            "[signaling]\nsecurity = \"allow-self-signed\"\n",
        )
        .unwrap();
        assert_eq!(config.signaling.security, SecurityLevel::AllowSelfSigned);
        let config: AgentConfig = toml::from_str("[signaling]\nsecurity = \"none\"\n").unwrap();
        assert_eq!(config.signaling.security, SecurityLevel::None);
    }

    #[test]
    fn inverted_port_range_rejected() {
        let config: AgentConfig =
            toml::from_str("[webrtc]\nudp_port_range = [16000, 15000]\n").unwrap();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("udp_port_range")));
    }

    #[test]
    fn retry_delay_bounds_checked() {
        let config: AgentConfig = toml::from_str(
            "[signaling]\nretry_initial_delay_ms = 5000\nretry_max_delay_ms = 100\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
