//! Wire protocol between the guest ConfUI HAL and the host server.
//!
//! Frames are a `u32` little-endian byte length followed by a CBOR body.
//! Every request the HAL sends gets exactly one response.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single frame body. The HAL never sends anything close
/// to this; larger lengths indicate a desynchronized or hostile peer.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error on HAL socket: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(usize),
    #[error("CBOR codec error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalCommand {
    Start,
    Stop,
    Abort,
    Suspend,
    Restore,
    TestInput,
}

/// Synthetic input injected by `test_input` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestEvent {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalRequest {
    pub session_id: String,
    pub command: HalCommand,
    /// Raw prompt bytes for `start`; UTF-8 validation happens in the
    /// session, not the transport.
    #[serde(default, with = "serde_bytes")]
    pub prompt: Vec<u8>,
    #[serde(default)]
    pub locale: String,
    /// Accessibility flags: "inverted", "magnified".
    #[serde(default)]
    pub ui_options: Vec<String>,
    #[serde(default, with = "serde_bytes")]
    pub extra: Vec<u8>,
    /// Present only on `test_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<TestEvent>,
}

impl HalRequest {
    pub fn plain(session_id: &str, command: HalCommand) -> Self {
        Self {
            session_id: session_id.to_string(),
            command,
            prompt: Vec::new(),
            locale: String::new(),
            ui_options: Vec::new(),
            extra: Vec::new(),
            event: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HalResponse {
    /// Command outcome. `text` is a short human-readable reason on failure.
    Ack {
        session_id: String,
        success: bool,
        text: String,
    },
    /// The user confirmed a secure prompt. `message` is the canonical CBOR
    /// envelope and `sign` the HMAC tag over it.
    Confirmation {
        session_id: String,
        #[serde(with = "serde_bytes")]
        message: Vec<u8>,
        #[serde(with = "serde_bytes")]
        sign: Vec<u8>,
    },
}

impl HalResponse {
    pub fn ack(session_id: &str, success: bool, text: impl Into<String>) -> Self {
        HalResponse::Ack {
            session_id: session_id.to_string(),
            success,
            text: text.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            HalResponse::Ack { session_id, .. } => session_id,
            HalResponse::Confirmation { session_id, .. } => session_id,
        }
    }
}

pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<T, WireError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(serde_cbor::from_slice(&body)?)
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), WireError> {
    let body = serde_cbor::to_vec(value)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}
