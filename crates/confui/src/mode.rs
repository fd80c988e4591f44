use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

/// Process-wide display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Android = 0,
    ConfUi = 1,
}

/// The single process-wide mode flag.
///
/// Readers are frequent (one read per produced frame) and transitions are
/// rare, so reads go through the atomic without touching the mutex. The
/// mutex/condvar pair only exists so frame producers can sleep through a
/// ConfUI session instead of spinning. Transitions are driven by exactly one
/// thread (the ConfUI main loop); no operation here allocates.
pub struct ModeCtrl {
    mode: AtomicU8,
    lock: Mutex<()>,
    android_again: Condvar,
}

impl ModeCtrl {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(Mode::Android as u8),
            lock: Mutex::new(()),
            android_again: Condvar::new(),
        }
    }

    pub fn is_android_mode(&self) -> bool {
        self.mode.load(Ordering::Acquire) == Mode::Android as u8
    }

    pub fn is_confui_mode(&self) -> bool {
        self.mode.load(Ordering::Acquire) == Mode::ConfUi as u8
    }

    /// Block until the mode is Android. Called once per frame by the Android
    /// frame producer; the common case must not acquire the mutex.
    pub fn wait_android_mode(&self) {
        if self.is_android_mode() {
            return;
        }
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // Re-check under the lock: the flip may have happened between the
        // atomic read and acquiring the mutex.
        while self.mode.load(Ordering::Acquire) != Mode::Android as u8 {
            guard = self
                .android_again
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.mode.store(mode as u8, Ordering::Release);
        if mode == Mode::Android {
            self.android_again.notify_all();
        }
    }
}

impl Default for ModeCtrl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn starts_in_android_mode() {
        let ctrl = ModeCtrl::new();
        assert!(ctrl.is_android_mode());
        assert!(!ctrl.is_confui_mode());
    }

    #[test]
    fn wait_returns_immediately_in_android_mode() {
        let ctrl = ModeCtrl::new();
        ctrl.wait_android_mode();
    }

    #[test]
    fn set_mode_flips_both_predicates() {
        let ctrl = ModeCtrl::new();
        ctrl.set_mode(Mode::ConfUi);
        assert!(ctrl.is_confui_mode());
        ctrl.set_mode(Mode::Android);
        assert!(ctrl.is_android_mode());
    }

    #[test]
    fn waiter_wakes_on_transition_to_android() {
        let ctrl = Arc::new(ModeCtrl::new());
        ctrl.set_mode(Mode::ConfUi);

        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            std::thread::spawn(move || {
                ctrl.wait_android_mode();
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        ctrl.set_mode(Mode::Android);
        waiter.join().unwrap();
    }
}
