mod cli;
mod client;
mod data_channels;
mod encoder;
mod input;
mod keyboard;
mod ports;
mod signaling;
mod streamer;
mod tls;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use prism_confui::render::DisplayGeometry;
use prism_confui::{ConfUiServer, Frame, FrameBroker, FrameSource, ModeCtrl};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use webrtc::media::Sample;

use crate::data_channels::ChannelDeps;
use crate::encoder::RawEncoder;
use crate::input::{ChannelSink, InputRouter};
use crate::signaling::Signaling;
use crate::streamer::Streamer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;
    let config = args.config;
    if let Err(issues) = config.validate() {
        let mut fatal = false;
        for issue in &issues {
            if issue.starts_with("ERROR") {
                error!("{issue}");
                fatal = true;
            } else {
                warn!("{issue}");
            }
        }
        if fatal {
            anyhow::bail!("invalid configuration");
        }
    }
    info!(
        device_id = %config.device.id,
        url = %config.signaling.url,
        "Starting prism-agent"
    );

    let key = match config.confui.auth_token_key.as_deref() {
        Some(path) => prism_confui::sign::load_key(path)
            .with_context(|| format!("load auth token key from {path}"))?,
        None => {
            warn!("no auth token key configured, signing confirmations with the test key");
            prism_confui::sign::TEST_KEY
        }
    };

    let mode = Arc::new(ModeCtrl::new());
    let broker = Arc::new(FrameBroker::new(Arc::clone(&mode)));
    let display0 = config
        .device
        .displays
        .first()
        .context("no displays configured")?;
    let geometry = DisplayGeometry {
        width: display0.width,
        height: display0.height,
        dpi: display0.dpi,
    };
    let confui_server = ConfUiServer::start(
        Path::new(&config.confui.hal_socket),
        Arc::clone(&mode),
        Arc::clone(&broker),
        geometry,
        key,
        Duration::from_millis(config.confui.grace_period_ms),
    )
    .with_context(|| format!("bind HAL socket {}", config.confui.hal_socket))?;
    info!(socket = %config.confui.hal_socket, "confirmation UI HAL socket ready");

    // Guest input drain. The virtio input device plumbing attaches here;
    // until then translated events are only traced.
    let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = guest_rx.recv().await {
            trace!(?event, "guest input event");
        }
    });

    let (camera_tx, mut camera_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(blob) = camera_rx.recv().await {
            debug!(bytes = blob.len(), "camera frame received");
        }
    });

    let router = Arc::new(InputRouter::new(
        Arc::clone(&mode),
        Arc::new(ChannelSink::new(guest_tx)),
        Arc::new(confui_server.user_input_sender()),
    ));
    let channel_deps = Arc::new(ChannelDeps {
        router,
        adb_port: config.device.adb_port,
        bluetooth_port: config.device.bluetooth_port,
        camera_tx,
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let streamer = Streamer::new(&config, channel_deps, cmd_tx.clone(), outbound_tx)?;
    let video_tracks = streamer.video_tracks();
    tokio::spawn(streamer.run(cmd_rx));

    // Capacity 2: a stalled track write drops frames instead of building a
    // latency queue.
    let (encoded_tx, mut encoded_rx) = mpsc::channel(2);
    let shutdown = Arc::new(AtomicBool::new(false));
    let encode_thread = encoder::spawn_encode_loop(
        Arc::clone(&broker),
        Box::new(RawEncoder::new(config.webrtc.start_bitrate_kbps)),
        encoded_tx,
        Arc::clone(&shutdown),
    )
    .context("spawn encode thread")?;

    tokio::spawn(async move {
        while let Some(frame) = encoded_rx.recv().await {
            let Some(track) = video_tracks.get(frame.display_index) else {
                debug!(display = frame.display_index, "frame for unknown display");
                continue;
            };
            let sample = Sample {
                data: frame.data,
                duration: frame.duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("video sample dropped: {e}");
            }
        }
    });

    let signaling = Signaling::new(&config, cmd_tx, outbound_rx);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signaling.run() => {
            if let Err(e) = result {
                error!("signaling loop failed: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }

    shutdown.store(true, Ordering::Relaxed);
    // The encode thread blocks in the broker; a synthetic frame wakes it so
    // it can observe the flag. The ConfUI queue is served in either mode.
    broker.push_confui(Frame {
        display_index: 0,
        width: 1,
        height: 1,
        source: FrameSource::ConfUi,
        data: vec![0xff000000],
    });
    confui_server.shutdown();
    if encode_thread.join().is_err() {
        warn!("encode thread panicked during shutdown");
    }
    info!("prism-agent stopped");
    Ok(())
}
