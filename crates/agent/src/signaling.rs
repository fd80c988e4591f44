use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use prism_protocol::validate::{Kind, ValidationError, validate};
use prism_protocol::{
    AgentConfig, AudioStreamInfo, DeviceInfo, DeviceMessage, DisplayInfo, SignalingConfig,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::streamer::{OperatorEvent, StreamerCmd};
use crate::tls;

/// Maintains the WebSocket session with the operator: registers the device,
/// feeds inbound operator traffic to the streamer, and drains the streamer's
/// outbound queue. Reconnects with exponential backoff when the link drops.
pub struct Signaling {
    config: SignalingConfig,
    register: DeviceMessage,
    cmd_tx: mpsc::UnboundedSender<StreamerCmd>,
    outbound_rx: mpsc::UnboundedReceiver<DeviceMessage>,
}

enum SessionEnd {
    /// The streamer side of the outbound queue is gone; the agent is
    /// shutting down.
    Shutdown,
    /// The operator closed the socket or the read failed after a successful
    /// registration.
    Lost,
}

impl Signaling {
    pub fn new(
        config: &AgentConfig,
        cmd_tx: mpsc::UnboundedSender<StreamerCmd>,
        outbound_rx: mpsc::UnboundedReceiver<DeviceMessage>,
    ) -> Self {
        Self {
            config: config.signaling.clone(),
            register: register_message(config),
            cmd_tx,
            outbound_rx,
        }
    }

    /// Run until shutdown or until the retry budget is exhausted.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut attempt: u32 = 0;
        let mut registered = false;
        loop {
            match self.serve_connection().await {
                Ok(SessionEnd::Shutdown) => {
                    info!("signaling loop shutting down");
                    return Ok(());
                }
                Ok(SessionEnd::Lost) => {
                    registered = true;
                    attempt = 0;
                    warn!("operator connection lost");
                    let _ = self
                        .cmd_tx
                        .send(StreamerCmd::Operator(OperatorEvent::Disconnected));
                }
                Err(e) => warn!("operator connection attempt failed: {e:#}"),
            }

            let budget = if registered {
                self.config.reconnect_retries
            } else {
                self.config.registration_retries
            };
            attempt += 1;
            if attempt >= budget {
                anyhow::bail!("giving up on the operator after {attempt} attempts");
            }
            let delay = backoff_delay(
                attempt - 1,
                Duration::from_millis(self.config.retry_initial_delay_ms),
                Duration::from_millis(self.config.retry_max_delay_ms),
            );
            info!(attempt, ?delay, "retrying operator connection");
            tokio::time::sleep(delay).await;
        }
    }

    async fn serve_connection(&mut self) -> anyhow::Result<SessionEnd> {
        let connector = tls::build_connector(
            self.config.security,
            self.config.pinned_cert.as_deref(),
        )?;
        let (mut ws, _response) = tokio_tungstenite::connect_async_tls_with_config(
            self.config.url.as_str(),
            None,
            false,
            connector,
        )
        .await
        .with_context(|| format!("connect to {}", self.config.url))?;

        let register = serde_json::to_string(&self.register).context("serialize register")?;
        ws.send(Message::text(register))
            .await
            .context("send register")?;
        info!(url = %self.config.url, "registered with the operator");

        loop {
            tokio::select! {
                inbound = ws.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.handle_inbound(text.as_str()),
                        Some(Ok(Message::Binary(_))) => {
                            warn!("binary frame from the operator, dropped");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "operator closed the connection");
                            return Ok(SessionEnd::Lost);
                        }
                        // Pongs for these are queued by the library.
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            warn!("operator read failed: {e}");
                            return Ok(SessionEnd::Lost);
                        }
                        None => return Ok(SessionEnd::Lost),
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(msg) = outbound else {
                        let _ = ws.close(None).await;
                        return Ok(SessionEnd::Shutdown);
                    };
                    let text = serde_json::to_string(&msg).context("serialize outbound")?;
                    ws.send(Message::text(text)).await.context("send to operator")?;
                }
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("operator sent unparseable JSON: {e}");
                return;
            }
        };
        match parse_operator_message(&msg) {
            Ok(event) => {
                debug!(?event, "operator message");
                let _ = self.cmd_tx.send(StreamerCmd::Operator(event));
            }
            Err(e) => warn!("malformed operator message: {e}"),
        }
    }
}

/// Classify one operator JSON message.
fn parse_operator_message(msg: &Value) -> Result<OperatorEvent, ValidationError> {
    validate(msg, &[("type", Kind::String)], &[])?;
    let kind = msg.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "config" => Ok(OperatorEvent::Config(msg.clone())),
        "client_msg" => {
            validate(
                msg,
                &[("client_id", Kind::Int), ("payload", Kind::Object)],
                &[],
            )?;
            Ok(OperatorEvent::ClientMsg {
                client_id: msg["client_id"].as_i64().unwrap_or_default(),
                payload: msg["payload"].clone(),
            })
        }
        "client_disconnect" => {
            validate(msg, &[("client_id", Kind::Int)], &[])?;
            Ok(OperatorEvent::ClientDisconnect {
                client_id: msg["client_id"].as_i64().unwrap_or_default(),
            })
        }
        other => Err(ValidationError::WrongType {
            field: format!("type '{other}'"),
            expected: "config, client_msg or client_disconnect",
        }),
    }
}

/// Delay before retry `attempt` (zero-based): the initial delay doubled per
/// attempt, saturating at `max`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u64 << attempt.min(32);
    initial.saturating_mul(factor.min(u64::from(u32::MAX)) as u32).min(max)
}

/// Build the `register` message advertised to the operator from the static
/// device configuration.
pub fn register_message(config: &AgentConfig) -> DeviceMessage {
    let displays = config
        .device
        .displays
        .iter()
        .enumerate()
        .map(|(i, d)| DisplayInfo {
            stream_id: format!("display_{i}"),
            x_res: d.width,
            y_res: d.height,
            dpi: d.dpi,
            is_touch: d.touch,
        })
        .collect();
    DeviceMessage::Register {
        device_id: config.device.id.clone(),
        device_port: config.device.port,
        device_info: DeviceInfo {
            displays,
            audio_streams: vec![AudioStreamInfo {
                stream_id: "audio_0".to_string(),
            }],
            hardware: config.device.hardware.clone(),
            custom_control_panel_buttons: config.device.control_panel_buttons.clone(),
        },
    }
}
