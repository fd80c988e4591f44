use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use prism_confui::{Frame, FrameBroker};
use tracing::{debug, info};

/// One encoded video access unit ready for a media track.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub display_index: usize,
    pub data: Bytes,
    pub duration: Duration,
    pub keyframe: bool,
}

/// Codec seam between the frame broker and the media tracks. The initial
/// bitrate comes from config so the first frames are not starved by a
/// library ramping up from its default.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> anyhow::Result<EncodedFrame>;
    fn force_keyframe(&mut self);
    fn bitrate_kbps(&self) -> u32;
}

const RAW_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Uncompressed passthrough encoder: a small header plus the ARGB pixels.
/// Every frame is self-contained, so every frame is a keyframe. Production
/// builds replace this with a hardware codec behind the same trait.
pub struct RawEncoder {
    bitrate_kbps: u32,
    frames: u64,
}

impl RawEncoder {
    pub fn new(bitrate_kbps: u32) -> Self {
        info!(bitrate_kbps, "raw passthrough encoder");
        Self {
            bitrate_kbps,
            frames: 0,
        }
    }
}

impl VideoEncoder for RawEncoder {
    fn encode(&mut self, frame: &Frame) -> anyhow::Result<EncodedFrame> {
        let mut buf = BytesMut::with_capacity(8 + frame.data.len() * 4);
        buf.put_u32_le(frame.width);
        buf.put_u32_le(frame.height);
        for px in &frame.data {
            buf.put_u32_le(*px);
        }
        self.frames += 1;
        Ok(EncodedFrame {
            display_index: frame.display_index,
            data: buf.freeze(),
            duration: RAW_FRAME_DURATION,
            keyframe: true,
        })
    }

    fn force_keyframe(&mut self) {}

    fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }
}

/// Drain the broker on a dedicated thread and hand encoded frames to the
/// async side. A full channel drops the frame; latency beats completeness.
pub fn spawn_encode_loop(
    broker: Arc<FrameBroker>,
    mut encoder: Box<dyn VideoEncoder>,
    tx: tokio::sync::mpsc::Sender<EncodedFrame>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("encode".into())
        .spawn(move || {
            loop {
                let frame = broker.pop();
                if shutdown.load(Ordering::Relaxed) {
                    info!("encode thread shutting down");
                    return;
                }
                let encoded = match encoder.encode(&frame) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!("encode failed, frame dropped: {e:#}");
                        continue;
                    }
                };
                match tx.try_send(encoded) {
                    Ok(()) => {}
                    Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                        debug!("encoded frame dropped (channel full)");
                    }
                    Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                        info!("encoded frame channel closed, stopping encode thread");
                        return;
                    }
                }
            }
        })
}
