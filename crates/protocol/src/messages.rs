use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::validate::{Kind, ValidationError, validate};

/// Messages sent from the device to the operator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceMessage {
    Register {
        device_id: String,
        device_port: u16,
        device_info: DeviceInfo,
    },
    Forward {
        client_id: i64,
        payload: Value,
    },
}

/// Device capabilities advertised in the `register` message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    pub displays: Vec<DisplayInfo>,
    pub audio_streams: Vec<AudioStreamInfo>,
    pub hardware: BTreeMap<String, String>,
    pub custom_control_panel_buttons: Vec<ControlPanelButton>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayInfo {
    pub stream_id: String,
    pub x_res: u32,
    pub y_res: u32,
    pub dpi: u32,
    pub is_touch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioStreamInfo {
    pub stream_id: String,
}

/// A custom button shown in the browser control panel. Carries either a
/// shell command or a list of device states, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPanelButton {
    pub command: String,
    pub title: String,
    pub icon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_states: Vec<DeviceState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid_switch_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hinge_angle_value: Option<i32>,
}

/// Signaling payloads sent to a browser client (wrapped in `forward` by the
/// streamer). Key casing follows the browser side: `mLineIndex` is camelCase.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientReply {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        mid: String,
        #[serde(rename = "mLineIndex")]
        m_line_index: u16,
        candidate: String,
    },
    Error {
        error: String,
    },
}

/// One entry of the `ice_servers` list in an operator `config` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Parse the `ice_servers` list from an operator `config` message.
///
/// A `config` without `ice_servers` is valid and yields an empty list; an
/// entry without a non-empty `urls` array is malformed.
pub fn parse_ice_servers(msg: &Value) -> Result<Vec<IceServerEntry>, ValidationError> {
    validate(msg, &[], &[("ice_servers", Kind::Array)])?;
    let Some(entries) = msg.get("ice_servers").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut servers = Vec::with_capacity(entries.len());
    for entry in entries {
        validate(
            entry,
            &[("urls", Kind::Array)],
            &[("username", Kind::String), ("credential", Kind::String)],
        )?;
        let server: IceServerEntry = serde_json::from_value(entry.clone())
            .map_err(|_| ValidationError::WrongType {
                field: "urls".into(),
                expected: "array",
            })?;
        if server.urls.is_empty() {
            return Err(ValidationError::MissingField("urls".into()));
        }
        servers.push(server);
    }
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_message_shape() {
        let msg = DeviceMessage::Register {
            device_id: "cvd-1".into(),
            device_port: 8443,
            device_info: DeviceInfo {
                displays: vec![DisplayInfo {
                    stream_id: "display_0".into(),
                    x_res: 720,
                    y_res: 1280,
                    dpi: 320,
                    is_touch: true,
                }],
                audio_streams: vec![AudioStreamInfo {
                    stream_id: "audio_0".into(),
                }],
                hardware: BTreeMap::from([("cpus".into(), "4".into())]),
                custom_control_panel_buttons: vec![],
            },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "register");
        assert_eq!(v["device_id"], "cvd-1");
        assert_eq!(v["device_port"], 8443);
        assert_eq!(v["device_info"]["displays"][0]["x_res"], 720);
        assert_eq!(v["device_info"]["displays"][0]["is_touch"], true);
        assert_eq!(v["device_info"]["audio_streams"][0]["stream_id"], "audio_0");
        assert_eq!(v["device_info"]["hardware"]["cpus"], "4");
    }

    #[test]
    fn forward_wraps_payload() {
        let msg = DeviceMessage::Forward {
            client_id: 3,
            payload: json!({"type": "offer", "sdp": "v=0"}),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "forward");
        assert_eq!(v["client_id"], 3);
        assert_eq!(v["payload"]["type"], "offer");
    }

    #[test]
    fn control_panel_button_omits_empty_variants() {
        let plain = ControlPanelButton {
            command: "home".into(),
            title: "Home".into(),
            icon_name: "home".into(),
            shell_command: None,
            device_states: vec![],
        };
        let v = serde_json::to_value(&plain).unwrap();
        assert!(v.get("shell_command").is_none());
        assert!(v.get("device_states").is_none());

        let folded = ControlPanelButton {
            command: "device_state".into(),
            title: "Fold".into(),
            icon_name: "fold".into(),
            shell_command: None,
            device_states: vec![DeviceState {
                lid_switch_open: Some(false),
                hinge_angle_value: Some(0),
            }],
        };
        let v = serde_json::to_value(&folded).unwrap();
        assert_eq!(v["device_states"][0]["lid_switch_open"], false);
        assert_eq!(v["device_states"][0]["hinge_angle_value"], 0);
    }

    #[test]
    fn ice_candidate_reply_uses_camel_case_line_index() {
        let reply = ClientReply::IceCandidate {
            mid: "0".into(),
            m_line_index: 0,
            candidate: "candidate:1 1 UDP 1 10.0.0.1 9 typ host".into(),
        };
        let text = serde_json::to_string(&reply).unwrap();
        assert!(text.contains(r#""type":"ice-candidate""#));
        assert!(text.contains(r#""mLineIndex":0"#));
        assert!(!text.contains("m_line_index"));
    }

    #[test]
    fn error_reply_shape() {
        let text = serde_json::to_string(&ClientReply::Error {
            error: "invalid message".into(),
        })
        .unwrap();
        assert!(text.contains(r#""type":"error""#));
    }

    #[test]
    fn ice_servers_parsed_from_config() {
        let msg = json!({
            "type": "config",
            "ice_servers": [
                {"urls": ["stun:stun.example.com:3478"]},
                {"urls": ["turn:turn.example.com:3478"], "username": "u", "credential": "c"},
            ],
        });
        let servers = parse_ice_servers(&msg).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.com:3478"]);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn config_without_ice_servers_is_empty() {
        assert_eq!(parse_ice_servers(&json!({"type": "config"})).unwrap(), vec![]);
    }

    #[test]
    fn ice_server_without_urls_rejected() {
        let msg = json!({"ice_servers": [{"username": "u"}]});
        assert!(parse_ice_servers(&msg).is_err());
        let msg = json!({"ice_servers": [{"urls": []}]});
        assert!(parse_ice_servers(&msg).is_err());
    }
}
