use std::sync::Arc;

use bytes::Bytes;
use prism_protocol::validate::{Kind, ValidationError, validate};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;

use crate::input::InputRouter;
use crate::keyboard;

pub const LABEL_INPUT: &str = "input-channel";
pub const LABEL_CONTROL: &str = "device-control";
pub const LABEL_ADB: &str = "adb-channel";
pub const LABEL_BLUETOOTH: &str = "bluetooth-channel";
pub const LABEL_CAMERA: &str = "camera-data-channel";

/// Camera uploads end with this text sentinel.
const CAMERA_EOF: &str = "EOF";

/// A validated message from the input or device-control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Mouse {
        display: usize,
        x: i32,
        y: i32,
        down: bool,
    },
    MultiTouch {
        display: usize,
        ids: Vec<i64>,
        xs: Vec<i32>,
        ys: Vec<i32>,
        down: bool,
        slots: usize,
    },
    Key {
        code: u16,
        down: bool,
    },
    Wheel {
        pixels: i32,
    },
    DeviceState {
        lid_switch_open: Option<bool>,
        hinge_angle_value: Option<i32>,
    },
    /// Opaque `camera_*` control payload, forwarded to the camera pipeline.
    Camera(Value),
}

fn display_index(label: &str) -> Result<usize, ValidationError> {
    label
        .strip_prefix("display_")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ValidationError::WrongType {
            field: "display_label".into(),
            expected: "string",
        })
}

fn int_array(msg: &Value, field: &str) -> Result<Vec<i64>, ValidationError> {
    msg.get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_i64).collect::<Vec<_>>())
        .ok_or_else(|| ValidationError::WrongType {
            field: field.into(),
            expected: "array",
        })
}

/// Parse one JSON message from the input or device-control channel.
///
/// Returns `Ok(None)` for messages that are well-formed but have no effect
/// (unknown keyboard codes). Control messages carry a `command` field,
/// input messages a `type` field; `device_state` and `camera_*` commands are
/// accepted on both channels.
pub fn parse_message(msg: &Value) -> Result<Option<ParsedEvent>, ValidationError> {
    if let Some(command) = msg.get("command").and_then(Value::as_str) {
        if command == "device_state" {
            validate(
                msg,
                &[("command", Kind::String)],
                &[
                    ("lid_switch_open", Kind::Bool),
                    ("hinge_angle_value", Kind::Int),
                ],
            )?;
            return Ok(Some(ParsedEvent::DeviceState {
                lid_switch_open: msg.get("lid_switch_open").and_then(Value::as_bool),
                hinge_angle_value: msg
                    .get("hinge_angle_value")
                    .and_then(Value::as_i64)
                    .map(|v| v as i32),
            }));
        }
        if command.starts_with("camera_") {
            return Ok(Some(ParsedEvent::Camera(msg.clone())));
        }
        return Err(ValidationError::WrongType {
            field: "command".into(),
            expected: "string",
        });
    }

    validate(msg, &[("type", Kind::String)], &[])?;
    let kind = msg.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "mouse" => {
            validate(
                msg,
                &[
                    ("down", Kind::Int),
                    ("x", Kind::Int),
                    ("y", Kind::Int),
                    ("display_label", Kind::String),
                ],
                &[],
            )?;
            let label = msg["display_label"].as_str().unwrap_or_default();
            Ok(Some(ParsedEvent::Mouse {
                display: display_index(label)?,
                x: msg["x"].as_i64().unwrap_or_default() as i32,
                y: msg["y"].as_i64().unwrap_or_default() as i32,
                down: msg["down"].as_i64().unwrap_or_default() != 0,
            }))
        }
        "multi-touch" => {
            validate(
                msg,
                &[
                    ("display_label", Kind::String),
                    ("id", Kind::Array),
                    ("slot", Kind::Array),
                    ("x", Kind::Array),
                    ("y", Kind::Array),
                    ("down", Kind::Int),
                ],
                &[],
            )?;
            let ids = int_array(msg, "id")?;
            let slots = int_array(msg, "slot")?;
            let xs = int_array(msg, "x")?;
            let ys = int_array(msg, "y")?;
            if ids.len() != slots.len() || ids.len() != xs.len() || ids.len() != ys.len() {
                return Err(ValidationError::WrongType {
                    field: "id".into(),
                    expected: "array",
                });
            }
            let label = msg["display_label"].as_str().unwrap_or_default();
            Ok(Some(ParsedEvent::MultiTouch {
                display: display_index(label)?,
                ids,
                xs: xs.into_iter().map(|v| v as i32).collect(),
                ys: ys.into_iter().map(|v| v as i32).collect(),
                down: msg["down"].as_i64().unwrap_or_default() != 0,
                slots: slots.len(),
            }))
        }
        "keyboard" => {
            validate(
                msg,
                &[("event_type", Kind::String), ("keycode", Kind::String)],
                &[],
            )?;
            let down = match msg["event_type"].as_str().unwrap_or_default() {
                "keydown" => true,
                "keyup" => false,
                _ => {
                    return Err(ValidationError::WrongType {
                        field: "event_type".into(),
                        expected: "string",
                    });
                }
            };
            let name = msg["keycode"].as_str().unwrap_or_default();
            match keyboard::dom_to_evdev(name) {
                Some(code) => Ok(Some(ParsedEvent::Key { code, down })),
                None => {
                    debug!(keycode = name, "unknown keyboard code, dropped");
                    Ok(None)
                }
            }
        }
        "wheel" => {
            validate(msg, &[("pixels", Kind::Int)], &[])?;
            Ok(Some(ParsedEvent::Wheel {
                pixels: msg["pixels"].as_i64().unwrap_or_default() as i32,
            }))
        }
        other => Err(ValidationError::WrongType {
            field: format!("type ({other})"),
            expected: "string",
        }),
    }
}

/// Shared context for channel handlers of one client.
pub struct ChannelDeps {
    pub router: Arc<InputRouter>,
    pub adb_port: u16,
    pub bluetooth_port: u16,
    /// Completed camera uploads (one buffer per EOF) for the camera pipeline.
    pub camera_tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub fn apply_event(deps: &ChannelDeps, event: ParsedEvent) {
    match event {
        ParsedEvent::Mouse { display, x, y, down } => deps.router.touch(display, x, y, down),
        ParsedEvent::MultiTouch {
            display,
            ids,
            xs,
            ys,
            down,
            slots,
        } => deps.router.multi_touch(display, ids, xs, ys, down, slots),
        ParsedEvent::Key { code, down } => deps.router.key(code, down),
        ParsedEvent::Wheel { pixels } => deps.router.rotary(pixels),
        ParsedEvent::DeviceState {
            lid_switch_open,
            hinge_angle_value,
        } => deps.router.switches(lid_switch_open, hinge_angle_value),
        ParsedEvent::Camera(msg) => {
            debug!(?msg, "camera control forwarded");
        }
    }
}

/// Returns true when the label is one this module wires up; unknown labels
/// stay with the caller, which must retain them so the channel is not
/// dropped.
pub fn attach(dc: &Arc<RTCDataChannel>, deps: &Arc<ChannelDeps>) -> bool {
    match dc.label() {
        LABEL_INPUT | LABEL_CONTROL => {
            attach_json_handler(dc, Arc::clone(deps));
            true
        }
        LABEL_ADB => {
            attach_proxy(dc, "adb", deps.adb_port);
            true
        }
        LABEL_BLUETOOTH => {
            attach_proxy(dc, "bluetooth", deps.bluetooth_port);
            true
        }
        LABEL_CAMERA => {
            attach_camera(dc, Arc::clone(deps));
            true
        }
        _ => false,
    }
}

fn attach_json_handler(dc: &Arc<RTCDataChannel>, deps: Arc<ChannelDeps>) {
    let label = dc.label().to_string();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let deps = Arc::clone(&deps);
        let label = label.clone();
        Box::pin(async move {
            let parsed = serde_json::from_slice::<Value>(&msg.data)
                .map_err(|_| ValidationError::NotAnObject)
                .and_then(|v| parse_message(&v));
            match parsed {
                Ok(Some(event)) => apply_event(&deps, event),
                Ok(None) => {}
                Err(e) => warn!(channel = %label, "malformed message: {e}"),
            }
        })
    }));
}

/// Byte passthrough to a host TCP service. The socket opens lazily on the
/// first inbound message so an idle channel costs nothing.
fn attach_proxy(dc: &Arc<RTCDataChannel>, name: &'static str, port: u16) {
    let writer: Arc<Mutex<Option<OwnedWriteHalf>>> = Arc::new(Mutex::new(None));
    let dc_for_reader = Arc::clone(dc);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let writer = Arc::clone(&writer);
        let dc = Arc::clone(&dc_for_reader);
        Box::pin(async move {
            let mut guard = writer.lock().await;
            if guard.is_none() {
                match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(stream) => {
                        info!(name, port, "proxy socket opened");
                        let (mut read_half, write_half) = stream.into_split();
                        *guard = Some(write_half);
                        tokio::spawn(async move {
                            let mut buf = vec![0u8; 16 * 1024];
                            loop {
                                match read_half.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(n) => {
                                        if dc.send(&Bytes::copy_from_slice(&buf[..n])).await.is_err()
                                        {
                                            break;
                                        }
                                    }
                                }
                            }
                            debug!(name, "proxy reader finished");
                        });
                    }
                    Err(e) => {
                        warn!(name, port, "proxy connect failed: {e}");
                        return;
                    }
                }
            }
            if let Some(stream) = guard.as_mut()
                && let Err(e) = stream.write_all(&msg.data).await
            {
                warn!(name, "proxy write failed: {e}");
                *guard = None;
            }
        })
    }));
}

/// Camera frames arrive as binary chunks terminated by a text "EOF".
fn attach_camera(dc: &Arc<RTCDataChannel>, deps: Arc<ChannelDeps>) {
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let buffer = Arc::clone(&buffer);
        let deps = Arc::clone(&deps);
        Box::pin(async move {
            let mut buf = buffer.lock().await;
            if msg.is_string {
                if msg.data.as_ref() == CAMERA_EOF.as_bytes() {
                    let complete = std::mem::take(&mut *buf);
                    info!(bytes = complete.len(), "camera upload complete");
                    let _ = deps.camera_tx.send(complete);
                } else {
                    warn!("unexpected text on camera channel, ignored");
                }
            } else {
                buf.extend_from_slice(&msg.data);
            }
        })
    }));
}
