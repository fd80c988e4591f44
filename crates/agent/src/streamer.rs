use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use prism_protocol::messages::parse_ice_servers;
use prism_protocol::{AgentConfig, ClientReply, DeviceMessage, IceServerEntry};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::client::{ClientEvent, ClientSession, PeerCtx};
use crate::data_channels::ChannelDeps;
use crate::ports::PortRange;

/// Everything that mutates streamer state arrives as one of these on the
/// streamer task's queue. Callbacks and the signaling loop never touch the
/// maps directly.
#[derive(Debug)]
pub enum StreamerCmd {
    Operator(OperatorEvent),
    Client(ClientEvent),
    DestroyClient { client_id: i64 },
}

#[derive(Debug)]
pub enum OperatorEvent {
    Config(Value),
    ClientMsg { client_id: i64, payload: Value },
    ClientDisconnect { client_id: i64 },
    Disconnected,
}

/// Owns all per-client sessions and the media track registry. Runs as a
/// single task; see [`StreamerCmd`].
pub struct Streamer {
    api: Arc<API>,
    clients: HashMap<i64, ClientSession>,
    config_ice: Vec<IceServerEntry>,
    operator_ice: Vec<IceServerEntry>,
    video_tracks: Vec<Arc<TrackLocalStaticSample>>,
    audio_tracks: Vec<Arc<TrackLocalStaticSample>>,
    channel_deps: Arc<ChannelDeps>,
    cmd_tx: mpsc::UnboundedSender<StreamerCmd>,
    outbound_tx: mpsc::UnboundedSender<DeviceMessage>,
}

impl Streamer {
    pub fn new(
        config: &AgentConfig,
        channel_deps: Arc<ChannelDeps>,
        cmd_tx: mpsc::UnboundedSender<StreamerCmd>,
        outbound_tx: mpsc::UnboundedSender<DeviceMessage>,
    ) -> anyhow::Result<Self> {
        let api = Arc::new(build_api(config)?);

        let video_tracks = config
            .device
            .displays
            .iter()
            .enumerate()
            .map(|(i, _)| {
                Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_H264.to_string(),
                        clock_rate: 90000,
                        ..Default::default()
                    },
                    format!("display_{i}"),
                    "prism".to_string(),
                ))
            })
            .collect();
        let audio_tracks = vec![Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio_0".to_string(),
            "prism".to_string(),
        ))];

        Ok(Self {
            api,
            clients: HashMap::new(),
            config_ice: config.webrtc.ice_servers.clone(),
            operator_ice: Vec::new(),
            video_tracks,
            audio_tracks,
            channel_deps,
            cmd_tx,
            outbound_tx,
        })
    }

    pub fn video_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.video_tracks.clone()
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<StreamerCmd>) {
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
        info!("streamer task exiting");
    }

    async fn handle(&mut self, cmd: StreamerCmd) {
        match cmd {
            StreamerCmd::Operator(OperatorEvent::Config(msg)) => match parse_ice_servers(&msg) {
                Ok(servers) => {
                    info!(count = servers.len(), "operator ICE servers updated");
                    self.operator_ice = servers;
                }
                Err(e) => warn!("bad operator config: {e}"),
            },
            StreamerCmd::Operator(OperatorEvent::ClientMsg { client_id, payload }) => {
                self.dispatch_client_message(client_id, payload).await;
            }
            StreamerCmd::Operator(OperatorEvent::ClientDisconnect { client_id }) => {
                self.destroy_client(client_id);
            }
            StreamerCmd::Operator(OperatorEvent::Disconnected) => {
                // Established peer connections outlive an operator restart;
                // only the signaling path is gone until reconnect.
                info!(
                    clients = self.clients.len(),
                    "operator connection lost, keeping client sessions"
                );
            }
            StreamerCmd::Client(ClientEvent::IceCandidate {
                client_id,
                mid,
                m_line_index,
                candidate,
            }) => {
                if self.clients.contains_key(&client_id) {
                    self.forward(
                        client_id,
                        ClientReply::IceCandidate {
                            mid,
                            m_line_index,
                            candidate,
                        },
                    );
                } else {
                    debug!(client_id, "candidate for a destroyed session, dropped");
                }
            }
            StreamerCmd::Client(ClientEvent::ConnectionState { client_id, state }) => {
                if let Some(session) = self.clients.get_mut(&client_id)
                    && session.apply_connection_state(state)
                {
                    self.destroy_client(client_id);
                }
            }
            StreamerCmd::DestroyClient { client_id } => self.destroy_client(client_id),
        }
    }

    async fn dispatch_client_message(&mut self, client_id: i64, payload: Value) {
        let ctx = PeerCtx {
            api: Arc::clone(&self.api),
            ice_servers: self.rtc_ice_servers(),
            video_tracks: self.video_tracks.clone(),
            audio_tracks: self.audio_tracks.clone(),
            channel_deps: Arc::clone(&self.channel_deps),
            cmd_tx: self.cmd_tx.clone(),
        };
        let session = self
            .clients
            .entry(client_id)
            .or_insert_with(|| {
                info!(client_id, "new client session");
                ClientSession::new(client_id)
            });
        match session.handle_message(&ctx, &payload).await {
            Ok(replies) => {
                for reply in replies {
                    self.forward(client_id, reply);
                }
            }
            Err(e) => {
                warn!(client_id, "fatal client error: {e:#}");
                self.forward(
                    client_id,
                    ClientReply::Error {
                        error: format!("{e:#}"),
                    },
                );
                self.destroy_client(client_id);
            }
        }
    }

    fn forward(&self, client_id: i64, reply: ClientReply) {
        let payload = match serde_json::to_value(&reply) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to serialize client reply: {e}");
                return;
            }
        };
        if self
            .outbound_tx
            .send(DeviceMessage::Forward { client_id, payload })
            .is_err()
        {
            debug!(client_id, "outbound channel closed, reply dropped");
        }
    }

    fn destroy_client(&mut self, client_id: i64) {
        if let Some(mut session) = self.clients.remove(&client_id) {
            info!(client_id, "destroying client session");
            session.begin_destroy();
        }
    }

    /// Operator-supplied servers concatenated with the configured list; with
    /// neither present a public STUN server keeps ICE functional.
    fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        let servers: Vec<RTCIceServer> = self
            .operator_ice
            .iter()
            .chain(self.config_ice.iter())
            .map(|e| RTCIceServer {
                urls: e.urls.clone(),
                username: e.username.clone().unwrap_or_default(),
                credential: e.credential.clone().unwrap_or_default(),
            })
            .collect();
        if servers.is_empty() {
            return vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }];
        }
        servers
    }
}

fn build_api(config: &AgentConfig) -> anyhow::Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("register codecs")?;
    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).context("interceptors")?;

    let (lo, hi) = config.webrtc.udp_port_range;
    let range = PortRange::new(lo, hi)
        .with_context(|| format!("webrtc.udp_port_range [{lo}, {hi}] is empty"))?;
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_udp_network(UDPNetwork::Ephemeral(
        EphemeralUDP::new(range.min, range.max).context("ICE UDP port range")?,
    ));

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}
