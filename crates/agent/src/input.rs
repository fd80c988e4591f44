use std::sync::Arc;

use prism_confui::ModeCtrl;
use prism_confui::server::UserInputSender;
use tokio::sync::mpsc;
use tracing::debug;

/// A translated input event on its way to the emulated device.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestEvent {
    Touch {
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
    Rotary {
        pixels: i32,
    },
    Switches {
        lid_switch_open: Option<bool>,
        hinge_angle_value: Option<i32>,
    },
}

/// Destination for input events in normal (Android) operation.
pub trait InputSink: Send + Sync {
    fn send(&self, event: GuestEvent);
}

/// Destination for touch events stolen while a confirmation prompt is up.
pub trait ConfUiInput: Send + Sync {
    fn touch(&self, x: u32, y: u32);
    fn abort(&self);
}

impl ConfUiInput for UserInputSender {
    fn touch(&self, x: u32, y: u32) {
        UserInputSender::touch(self, x, y);
    }

    fn abort(&self) {
        UserInputSender::abort(self);
    }
}

/// Forwards guest events over a channel to the virtio input plumbing.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<GuestEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<GuestEvent>) -> Self {
        Self { tx }
    }
}

impl InputSink for ChannelSink {
    fn send(&self, event: GuestEvent) {
        if self.tx.send(event).is_err() {
            debug!("guest input channel closed, event dropped");
        }
    }
}

/// Routes input between the Android sink and the confirmation UI.
///
/// While a prompt is on screen only trusted touch-down events reach the
/// prompt's hit regions; everything else is swallowed so no input leaks into
/// Android underneath the trusted display.
pub struct InputRouter {
    mode: Arc<ModeCtrl>,
    android: Arc<dyn InputSink>,
    confui: Arc<dyn ConfUiInput>,
}

impl InputRouter {
    pub fn new(
        mode: Arc<ModeCtrl>,
        android: Arc<dyn InputSink>,
        confui: Arc<dyn ConfUiInput>,
    ) -> Self {
        Self {
            mode,
            android,
            confui,
        }
    }

    pub fn touch(&self, display: usize, x: i32, y: i32, down: bool) {
        if !self.mode.is_confui_mode() {
            self.android.send(GuestEvent::Touch { display, x, y, down });
            return;
        }
        if down && x >= 0 && y >= 0 {
            self.confui.touch(x as u32, y as u32);
        }
    }

    pub fn multi_touch(
        &self,
        display: usize,
        ids: Vec<i64>,
        xs: Vec<i32>,
        ys: Vec<i32>,
        down: bool,
        slots: usize,
    ) {
        if self.mode.is_confui_mode() {
            // First contact doubles as a plain touch-down on the prompt.
            if down && let (Some(&x), Some(&y)) = (xs.first(), ys.first())
                && x >= 0
                && y >= 0
            {
                self.confui.touch(x as u32, y as u32);
            }
            return;
        }
        self.android.send(GuestEvent::MultiTouch {
            display,
            ids,
            xs,
            ys,
            down,
            slots,
        });
    }

    pub fn key(&self, code: u16, down: bool) {
        if self.mode.is_confui_mode() {
            return;
        }
        self.android.send(GuestEvent::Key { code, down });
    }

    pub fn rotary(&self, pixels: i32) {
        if self.mode.is_confui_mode() {
            return;
        }
        self.android.send(GuestEvent::Rotary { pixels });
    }

    pub fn switches(&self, lid_switch_open: Option<bool>, hinge_angle_value: Option<i32>) {
        if self.mode.is_confui_mode() {
            return;
        }
        self.android.send(GuestEvent::Switches {
            lid_switch_open,
            hinge_angle_value,
        });
    }

    pub fn user_abort(&self) {
        if self.mode.is_confui_mode() {
            self.confui.abort();
        }
    }
}
