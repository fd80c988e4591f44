use std::sync::Arc;

use anyhow::Context;
use prism_protocol::ClientReply;
use prism_protocol::validate::{Kind, validate};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::data_channels::{self, ChannelDeps};
use crate::streamer::StreamerCmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    CreatingOffer,
    AwaitingAnswer,
    Connecting,
    Connected,
    Failed,
}

/// Peer-connection callbacks never touch session state directly; they post
/// one of these back to the streamer task.
#[derive(Debug)]
pub enum ClientEvent {
    IceCandidate {
        client_id: i64,
        mid: String,
        m_line_index: u16,
        candidate: String,
    },
    ConnectionState {
        client_id: i64,
        state: RTCPeerConnectionState,
    },
}

/// Everything a session needs to build its peer connection. Owned by the
/// streamer, borrowed per message.
pub struct PeerCtx {
    pub api: Arc<API>,
    pub ice_servers: Vec<RTCIceServer>,
    pub video_tracks: Vec<Arc<TrackLocalStaticSample>>,
    pub audio_tracks: Vec<Arc<TrackLocalStaticSample>>,
    pub channel_deps: Arc<ChannelDeps>,
    pub cmd_tx: mpsc::UnboundedSender<StreamerCmd>,
}

pub struct ClientSession {
    client_id: i64,
    state: ClientState,
    pc: Option<Arc<RTCPeerConnection>>,
    pending_ice: Vec<RTCIceCandidateInit>,
    remote_desc_set: bool,
    control_channel: Option<Arc<RTCDataChannel>>,
    // Channels with labels this build does not handle are kept alive here;
    // dropping the handle would close them under the browser.
    retained_channels: Arc<std::sync::Mutex<Vec<Arc<RTCDataChannel>>>>,
}

impl ClientSession {
    pub fn new(client_id: i64) -> Self {
        Self {
            client_id,
            state: ClientState::New,
            pc: None,
            pending_ice: Vec::new(),
            remote_desc_set: false,
            control_channel: None,
            retained_channels: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Handle one signaling payload from the browser.
    ///
    /// `Ok` replies include recoverable error replies; `Err` means the
    /// malformation is unrecoverable (bad SDP or ICE) and the streamer must
    /// destroy the session after sending the error.
    pub async fn handle_message(
        &mut self,
        ctx: &PeerCtx,
        payload: &Value,
    ) -> anyhow::Result<Vec<ClientReply>> {
        if let Err(e) = validate(payload, &[("type", Kind::String)], &[]) {
            return Ok(vec![ClientReply::Error {
                error: e.to_string(),
            }]);
        }
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match kind {
            "request-offer" => self.handle_request_offer(ctx).await,
            "offer" => self.handle_offer(ctx, payload).await,
            "answer" => self.handle_answer(payload).await,
            "ice-candidate" => self.handle_ice_candidate(payload).await,
            other => {
                warn!(client = self.client_id, kind = other, "unknown signaling type");
                Ok(vec![ClientReply::Error {
                    error: format!("unknown message type '{other}'"),
                }])
            }
        }
    }

    async fn handle_request_offer(&mut self, ctx: &PeerCtx) -> anyhow::Result<Vec<ClientReply>> {
        match self.state {
            ClientState::New => {
                self.build_peer_connection(ctx).await?;
                self.state = ClientState::CreatingOffer;
            }
            ClientState::Connecting | ClientState::Connected => {
                // Renegotiation reuses the established peer connection.
                info!(client = self.client_id, "renegotiation requested");
                self.remote_desc_set = false;
                self.state = ClientState::CreatingOffer;
            }
            ClientState::CreatingOffer | ClientState::AwaitingAnswer => {
                warn!(client = self.client_id, "request-offer while negotiating, rejected");
                return Ok(vec![ClientReply::Error {
                    error: "negotiation already in progress".into(),
                }]);
            }
            ClientState::Failed => {
                return Ok(vec![ClientReply::Error {
                    error: "session has failed".into(),
                }]);
            }
        }

        let pc = self.peer_connection()?;
        let offer = pc.create_offer(None).await.context("create offer")?;
        let sdp = offer.sdp.clone();
        pc.set_local_description(offer)
            .await
            .context("set local description")?;
        self.state = ClientState::AwaitingAnswer;
        Ok(vec![ClientReply::Offer { sdp }])
    }

    async fn handle_offer(
        &mut self,
        ctx: &PeerCtx,
        payload: &Value,
    ) -> anyhow::Result<Vec<ClientReply>> {
        if let Err(e) = validate(payload, &[("sdp", Kind::String)], &[]) {
            return Ok(vec![ClientReply::Error {
                error: e.to_string(),
            }]);
        }
        if self.pc.is_none() {
            self.build_peer_connection(ctx).await?;
        }
        let sdp = payload["sdp"].as_str().unwrap_or_default();
        let offer = RTCSessionDescription::offer(sdp.to_string()).context("parse SDP offer")?;
        let pc = self.peer_connection()?;
        pc.set_remote_description(offer)
            .await
            .context("set remote description")?;
        self.remote_desc_set = true;
        let answer = pc.create_answer(None).await.context("create answer")?;
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer)
            .await
            .context("set local description")?;
        self.flush_pending_ice().await;
        self.state = ClientState::Connecting;
        Ok(vec![ClientReply::Answer { sdp }])
    }

    async fn handle_answer(&mut self, payload: &Value) -> anyhow::Result<Vec<ClientReply>> {
        if let Err(e) = validate(payload, &[("sdp", Kind::String)], &[]) {
            return Ok(vec![ClientReply::Error {
                error: e.to_string(),
            }]);
        }
        if self.state != ClientState::AwaitingAnswer {
            warn!(client = self.client_id, state = ?self.state, "answer in wrong state");
            return Ok(vec![ClientReply::Error {
                error: "no offer awaiting an answer".into(),
            }]);
        }
        let sdp = payload["sdp"].as_str().unwrap_or_default();
        let answer = RTCSessionDescription::answer(sdp.to_string()).context("parse SDP answer")?;
        let pc = self.peer_connection()?;
        pc.set_remote_description(answer)
            .await
            .context("set remote description")?;
        self.remote_desc_set = true;
        self.flush_pending_ice().await;
        self.state = ClientState::Connecting;
        Ok(Vec::new())
    }

    async fn handle_ice_candidate(&mut self, payload: &Value) -> anyhow::Result<Vec<ClientReply>> {
        validate(payload, &[("candidate", Kind::Object)], &[])
            .map_err(anyhow::Error::from)
            .context("ice-candidate")?;
        let body = &payload["candidate"];
        validate(
            body,
            &[
                ("sdpMid", Kind::String),
                ("sdpMLineIndex", Kind::Int),
                ("candidate", Kind::String),
            ],
            &[],
        )
        .map_err(anyhow::Error::from)
        .context("ice-candidate body")?;

        let init = RTCIceCandidateInit {
            candidate: body["candidate"].as_str().unwrap_or_default().to_string(),
            sdp_mid: body["sdpMid"].as_str().map(str::to_string),
            sdp_mline_index: body["sdpMLineIndex"].as_u64().map(|v| v as u16),
            ..Default::default()
        };

        if !self.remote_desc_set {
            debug!(client = self.client_id, "candidate queued before remote description");
            self.pending_ice.push(init);
            return Ok(Vec::new());
        }
        let pc = self.peer_connection()?;
        pc.add_ice_candidate(init)
            .await
            .context("add ICE candidate")?;
        Ok(Vec::new())
    }

    /// Queued candidates are applied in receipt order once the remote
    /// description is in place. A candidate the library rejects is logged and
    /// skipped; later candidates still apply.
    async fn flush_pending_ice(&mut self) {
        let Some(pc) = self.pc.clone() else { return };
        for init in self.pending_ice.drain(..) {
            if let Err(e) = pc.add_ice_candidate(init).await {
                warn!(client = self.client_id, "queued ICE candidate rejected: {e}");
            }
        }
    }

    async fn build_peer_connection(&mut self, ctx: &PeerCtx) -> anyhow::Result<()> {
        let config = RTCConfiguration {
            ice_servers: ctx.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            ctx.api
                .new_peer_connection(config)
                .await
                .context("create peer connection")?,
        );

        for track in ctx.video_tracks.iter().chain(ctx.audio_tracks.iter()) {
            pc.add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .context("add track")?;
        }

        // The initial offer must carry at least one data channel; without it
        // the SCTP association is never negotiated and channels added later
        // cannot be established.
        let control = pc
            .create_data_channel(data_channels::LABEL_CONTROL, None)
            .await
            .context("create device-control channel")?;
        data_channels::attach(&control, &ctx.channel_deps);
        self.control_channel = Some(control);

        let client_id = self.client_id;
        let tx = ctx.cmd_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(json) => {
                        let _ = tx.send(StreamerCmd::Client(ClientEvent::IceCandidate {
                            client_id,
                            mid: json.sdp_mid.unwrap_or_default(),
                            m_line_index: json.sdp_mline_index.unwrap_or_default(),
                            candidate: json.candidate,
                        }));
                    }
                    Err(e) => warn!("failed to serialize ICE candidate: {e}"),
                }
            }
            Box::pin(async {})
        }));

        let tx = ctx.cmd_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = tx.send(StreamerCmd::Client(ClientEvent::ConnectionState {
                client_id,
                state,
            }));
            Box::pin(async {})
        }));

        let deps = Arc::clone(&ctx.channel_deps);
        let retained = Arc::clone(&self.retained_channels);
        pc.on_data_channel(Box::new(move |dc| {
            let deps = Arc::clone(&deps);
            let retained = Arc::clone(&retained);
            Box::pin(async move {
                info!(client = client_id, label = dc.label(), "data channel opened");
                if !data_channels::attach(&dc, &deps) {
                    debug!(label = dc.label(), "unhandled channel label, retained");
                    retained
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(dc);
                }
            })
        }));

        self.pc = Some(pc);
        Ok(())
    }

    fn peer_connection(&self) -> anyhow::Result<Arc<RTCPeerConnection>> {
        self.pc
            .clone()
            .context("no peer connection for this session")
    }

    /// Apply a connection-state change posted from the library callback.
    /// Returns true when the session has reached a terminal state and must
    /// be destroyed.
    pub fn apply_connection_state(&mut self, state: RTCPeerConnectionState) -> bool {
        match state {
            RTCPeerConnectionState::Connected => {
                info!(client = self.client_id, "client connected");
                self.state = ClientState::Connected;
                false
            }
            RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Closed => {
                info!(client = self.client_id, ?state, "client connection terminal");
                self.state = ClientState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Tear down asynchronously. Closing synchronously from a callback-driven
    /// path can deadlock on the callback dispatcher, so the close runs on a
    /// separate task and the session only drops its handles here.
    pub fn begin_destroy(&mut self) {
        self.control_channel = None;
        self.retained_channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(pc) = self.pc.take() {
            tokio::spawn(async move {
                if let Err(e) = pc.close().await {
                    warn!("peer connection close failed: {e}");
                }
            });
        }
        self.state = ClientState::Failed;
    }

    pub fn pending_ice_len(&self) -> usize {
        self.pending_ice.len()
    }
}
