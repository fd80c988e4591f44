use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::mode::ModeCtrl;

/// Which pipeline produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Android,
    ConfUi,
}

/// A raw frame on its way to the encoder. Pixels are packed `0xAARRGGBB`,
/// row-major, `width * height` entries.
#[derive(Debug, Clone)]
pub struct Frame {
    pub display_index: usize,
    pub width: u32,
    pub height: u32,
    pub source: FrameSource,
    pub data: Vec<u32>,
}

const QUEUE_CAP: usize = 2;

struct Queues {
    android: VecDeque<Frame>,
    confui: VecDeque<Frame>,
}

/// Single-consumer multiplexer of the two frame pipelines.
///
/// Producers never block: pushing onto a full queue drops that queue's
/// oldest frame. The consumer reads the mode flag inside the selection
/// predicate so a stale Android frame that raced a mode flip is discarded
/// instead of flashing on top of a confirmation prompt.
pub struct FrameBroker {
    mode: Arc<ModeCtrl>,
    queues: Mutex<Queues>,
    available: Condvar,
}

impl FrameBroker {
    pub fn new(mode: Arc<ModeCtrl>) -> Self {
        Self {
            mode,
            queues: Mutex::new(Queues {
                android: VecDeque::with_capacity(QUEUE_CAP),
                confui: VecDeque::with_capacity(QUEUE_CAP),
            }),
            available: Condvar::new(),
        }
    }

    pub fn push_android(&self, frame: Frame) {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if q.android.len() == QUEUE_CAP {
            q.android.pop_front();
        }
        q.android.push_back(frame);
        self.available.notify_one();
    }

    pub fn push_confui(&self, frame: Frame) {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if q.confui.len() == QUEUE_CAP {
            q.confui.pop_front();
        }
        q.confui.push_back(frame);
        self.available.notify_one();
    }

    /// Take the next frame, blocking until one is available.
    ///
    /// Selection: an empty Android queue yields the ConfUI frame; a non-empty
    /// Android queue is only served while the mode is Android, otherwise its
    /// head is dropped and selection repeats.
    pub fn pop(&self) -> Frame {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            while q.android.is_empty() && q.confui.is_empty() {
                q = self.available.wait(q).unwrap_or_else(|e| e.into_inner());
            }
            if q.android.is_empty() {
                if let Some(f) = q.confui.pop_front() {
                    return f;
                }
                continue;
            }
            if !self.mode.is_android_mode() {
                // Stale frame from before the flip to ConfUI.
                q.android.pop_front();
                continue;
            }
            if let Some(f) = q.android.pop_front() {
                return f;
            }
        }
    }

    /// Non-blocking variant used by tests and shutdown paths.
    pub fn try_pop(&self) -> Option<Frame> {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if q.android.is_empty() {
                return q.confui.pop_front();
            }
            if !self.mode.is_android_mode() {
                q.android.pop_front();
                continue;
            }
            return q.android.pop_front();
        }
    }
}
