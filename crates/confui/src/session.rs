use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::broker::FrameBroker;
use crate::envelope;
use crate::hal::{HalCommand, HalRequest, HalResponse};
use crate::mode::{Mode, ModeCtrl};
use crate::render::{DisplayGeometry, Renderer, UiOptions};
use crate::sign::{KEY_BYTES, sign_confirmation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    InSession,
    WaitStop,
    Suspended,
    AwaitCleanup,
    Terminated,
}

/// Input from the user side of the world, after the InputRouter has
/// stolen it from the Android path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Touch { x: u32, y: u32 },
    Confirm,
    Cancel,
    Abort,
}

/// One confirmation prompt, driven by HAL commands and user events.
///
/// At most one session is live at a time; the server enforces that. The
/// session owns the prompt, the canonical CBOR envelope built at start, and
/// the display mode for its lifetime: the mode is ConfUI exactly while the
/// state is `InSession` or `WaitStop`.
pub struct Session {
    id: String,
    state: SessionState,
    saved_state: SessionState,
    prompt: Vec<u8>,
    locale: String,
    options: UiOptions,
    extra: Vec<u8>,
    cbor_message: Vec<u8>,
    key: [u8; KEY_BYTES],
    grace: Duration,
    grace_deadline: Option<Instant>,
    mode: Arc<ModeCtrl>,
    broker: Arc<FrameBroker>,
    renderer: Renderer,
    geometry: DisplayGeometry,
}

impl Session {
    pub fn new(
        id: String,
        mode: Arc<ModeCtrl>,
        broker: Arc<FrameBroker>,
        geometry: DisplayGeometry,
        key: [u8; KEY_BYTES],
        grace: Duration,
    ) -> Self {
        Self {
            id,
            state: SessionState::Init,
            saved_state: SessionState::Init,
            prompt: Vec::new(),
            locale: String::new(),
            options: UiOptions::default(),
            extra: Vec::new(),
            cbor_message: Vec::new(),
            key,
            grace,
            grace_deadline: None,
            mode,
            broker,
            renderer: Renderer::new(0),
            geometry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn is_ready_for_user_input(&self) -> bool {
        match self.grace_deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Drop the session's claim on the display. Idempotent; called by the
    /// server when the session reaches `AwaitCleanup` and on HAL disconnect.
    pub fn cleanup(&mut self) {
        if self.state != SessionState::Terminated {
            self.mode.set_mode(Mode::Android);
            self.state = SessionState::Terminated;
            info!(session = %self.id, "confui session terminated");
        }
    }

    pub fn handle_hal(&mut self, req: &HalRequest) -> Vec<HalResponse> {
        match (self.state, req.command) {
            (SessionState::Init, HalCommand::Start) => self.start(req),
            (SessionState::InSession, HalCommand::Suspend)
            | (SessionState::WaitStop, HalCommand::Suspend) => {
                self.saved_state = self.state;
                self.mode.set_mode(Mode::Android);
                self.state = SessionState::Suspended;
                vec![HalResponse::ack(&self.id, true, "suspended")]
            }
            (SessionState::Suspended, HalCommand::Restore) => match self.repaint() {
                Ok(()) => {
                    self.mode.set_mode(Mode::ConfUi);
                    self.state = self.saved_state;
                    self.grace_deadline = Some(Instant::now() + self.grace);
                    vec![HalResponse::ack(&self.id, true, "restored")]
                }
                Err(reason) => {
                    self.fail();
                    vec![HalResponse::ack(&self.id, false, reason)]
                }
            },
            (SessionState::WaitStop, HalCommand::Stop) => {
                self.enter_cleanup();
                vec![HalResponse::ack(&self.id, true, "stopped")]
            }
            (
                SessionState::InSession | SessionState::WaitStop | SessionState::Suspended,
                HalCommand::Abort,
            ) => {
                self.enter_cleanup();
                vec![HalResponse::ack(&self.id, true, "aborted")]
            }
            (state, command) => {
                warn!(session = %self.id, ?state, ?command, "wrong hal command for state");
                self.fail();
                vec![HalResponse::ack(&self.id, false, "wrong hal command")]
            }
        }
    }

    /// `secure` marks input from the trusted local path; HAL-injected test
    /// input arrives insecure and never yields a signed token. The grace
    /// period applies to secure input only.
    pub fn handle_user(&mut self, event: UserEvent, secure: bool) -> Vec<HalResponse> {
        if self.state != SessionState::InSession {
            return Vec::new();
        }
        if secure && !self.is_ready_for_user_input() {
            info!(session = %self.id, "input inside grace period, ignored");
            return Vec::new();
        }
        enum Decision {
            Confirm,
            Cancel,
            Abort,
        }
        let decision = match event {
            UserEvent::Touch { x, y } => {
                if self.renderer.is_in_confirm(x, y) {
                    Decision::Confirm
                } else if self.renderer.is_in_cancel(x, y) {
                    Decision::Cancel
                } else {
                    return Vec::new();
                }
            }
            UserEvent::Confirm => Decision::Confirm,
            UserEvent::Cancel => Decision::Cancel,
            UserEvent::Abort => Decision::Abort,
        };
        match decision {
            Decision::Confirm => {
                self.state = SessionState::WaitStop;
                if secure {
                    let sign = sign_confirmation(&self.key, &self.cbor_message);
                    vec![HalResponse::Confirmation {
                        session_id: self.id.clone(),
                        message: self.cbor_message.clone(),
                        sign,
                    }]
                } else {
                    vec![HalResponse::ack(&self.id, true, "confirmed")]
                }
            }
            Decision::Cancel => {
                self.state = SessionState::WaitStop;
                vec![HalResponse::ack(&self.id, false, "canceled")]
            }
            Decision::Abort => {
                self.enter_cleanup();
                vec![HalResponse::ack(&self.id, false, "user aborted")]
            }
        }
    }

    fn start(&mut self, req: &HalRequest) -> Vec<HalResponse> {
        self.prompt = req.prompt.clone();
        self.locale = req.locale.clone();
        self.extra = req.extra.clone();
        self.options = UiOptions {
            inverted: req.ui_options.iter().any(|o| o == "inverted"),
            magnified: req.ui_options.iter().any(|o| o == "magnified"),
        };
        self.cbor_message = match envelope::build(&self.prompt, &self.extra) {
            Ok(cbor) => cbor,
            Err(e) => {
                self.fail();
                return vec![HalResponse::ack(&self.id, false, e.to_string())];
            }
        };
        self.mode.set_mode(Mode::ConfUi);
        if let Err(reason) = self.repaint() {
            self.fail();
            return vec![HalResponse::ack(&self.id, false, reason)];
        }
        self.state = SessionState::InSession;
        self.grace_deadline = Some(Instant::now() + self.grace);
        info!(session = %self.id, locale = %self.locale, "confirmation prompt displayed");
        vec![HalResponse::ack(&self.id, true, "started")]
    }

    fn repaint(&mut self) -> Result<(), String> {
        let frame = self
            .renderer
            .render(self.geometry, &self.prompt, &self.locale, self.options)
            .map_err(|e| e.to_string())?;
        self.broker.push_confui(frame);
        Ok(())
    }

    fn enter_cleanup(&mut self) {
        self.mode.set_mode(Mode::Android);
        self.state = SessionState::AwaitCleanup;
    }

    fn fail(&mut self) {
        self.enter_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::TEST_KEY;

    const GEOMETRY: DisplayGeometry = DisplayGeometry {
        width: 720,
        height: 1280,
        dpi: 320,
    };

    fn session(grace_ms: u64) -> (Arc<ModeCtrl>, Arc<FrameBroker>, Session) {
        let mode = Arc::new(ModeCtrl::new());
        let broker = Arc::new(FrameBroker::new(Arc::clone(&mode)));
        let session = Session::new(
            "s1".into(),
            Arc::clone(&mode),
            Arc::clone(&broker),
            GEOMETRY,
            TEST_KEY,
            Duration::from_millis(grace_ms),
        );
        (mode, broker, session)
    }

    fn start_request() -> HalRequest {
        let mut req = HalRequest::plain("s1", HalCommand::Start);
        req.prompt = b"Pay $5".to_vec();
        req.locale = "en".into();
        req.extra = vec![0x01, 0x02];
        req
    }

    fn started(grace_ms: u64) -> (Arc<ModeCtrl>, Arc<FrameBroker>, Session) {
        let (mode, broker, mut s) = session(grace_ms);
        let replies = s.handle_hal(&start_request());
        assert_eq!(replies, vec![HalResponse::ack("s1", true, "started")]);
        assert_eq!(s.state(), SessionState::InSession);
        (mode, broker, s)
    }

    fn confirm_center(s: &mut Session) -> Vec<HalResponse> {
        // Scan for a point inside the confirm region rather than hardcoding
        // layout coordinates.
        for y in (0..GEOMETRY.height).rev() {
            for x in (0..GEOMETRY.width).rev() {
                if s.renderer.is_in_confirm(x, y) {
                    return s.handle_user(UserEvent::Touch { x, y }, true);
                }
            }
        }
        panic!("no confirm region after render");
    }

    #[test]
    fn start_flips_mode_and_renders() {
        let (mode, broker, _s) = started(0);
        assert!(mode.is_confui_mode());
        let frame = broker.try_pop().unwrap();
        assert_eq!(frame.source, crate::broker::FrameSource::ConfUi);
    }

    #[test]
    fn secure_confirm_produces_signed_envelope() {
        let (_, _, mut s) = started(0);
        let replies = s.handle_user(UserEvent::Confirm, true);
        assert_eq!(s.state(), SessionState::WaitStop);
        let [HalResponse::Confirmation { message, sign, .. }] = replies.as_slice() else {
            panic!("expected a confirmation, got {replies:?}");
        };
        let expected: &[u8] = &[
            0xa2, 0x66, b'p', b'r', b'o', b'm', b'p', b't', 0x66, b'P', b'a', b'y', b' ', b'$',
            b'5', 0x65, b'e', b'x', b't', b'r', b'a', 0x42, 0x01, 0x02,
        ];
        assert_eq!(message, expected);
        assert_eq!(sign, &sign_confirmation(&TEST_KEY, expected));
    }

    #[test]
    fn touch_in_confirm_region_confirms() {
        let (_, _, mut s) = started(0);
        let replies = confirm_center(&mut s);
        assert!(matches!(
            replies.as_slice(),
            [HalResponse::Confirmation { .. }]
        ));
    }

    #[test]
    fn touch_outside_both_regions_is_dropped() {
        let (_, _, mut s) = started(0);
        let replies = s.handle_user(UserEvent::Touch { x: 0, y: 0 }, true);
        assert!(replies.is_empty());
        assert_eq!(s.state(), SessionState::InSession);
    }

    #[test]
    fn input_during_grace_period_is_ignored() {
        let (_, _, mut s) = started(60_000);
        assert!(s.handle_user(UserEvent::Confirm, true).is_empty());
        assert_eq!(s.state(), SessionState::InSession);
    }

    #[test]
    fn insecure_confirm_skips_grace_and_signature() {
        let (_, _, mut s) = started(60_000);
        let replies = s.handle_user(UserEvent::Confirm, false);
        assert_eq!(replies, vec![HalResponse::ack("s1", true, "confirmed")]);
        assert_eq!(s.state(), SessionState::WaitStop);
    }

    #[test]
    fn cancel_is_a_negative_ack() {
        let (_, _, mut s) = started(0);
        let replies = s.handle_user(UserEvent::Cancel, true);
        assert_eq!(replies, vec![HalResponse::ack("s1", false, "canceled")]);
        assert_eq!(s.state(), SessionState::WaitStop);
    }

    #[test]
    fn stop_after_confirm_reaches_cleanup_and_android_mode() {
        let (mode, _, mut s) = started(0);
        s.handle_user(UserEvent::Confirm, true);
        let replies = s.handle_hal(&HalRequest::plain("s1", HalCommand::Stop));
        assert_eq!(replies, vec![HalResponse::ack("s1", true, "stopped")]);
        assert_eq!(s.state(), SessionState::AwaitCleanup);
        assert!(mode.is_android_mode());
        s.cleanup();
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn suspend_restore_preserves_signed_output() {
        let (mode, broker, mut s) = started(0);
        // Drain the first rendered frame.
        broker.try_pop().unwrap();

        let replies = s.handle_hal(&HalRequest::plain("s1", HalCommand::Suspend));
        assert_eq!(replies, vec![HalResponse::ack("s1", true, "suspended")]);
        assert_eq!(s.state(), SessionState::Suspended);
        assert!(mode.is_android_mode());
        assert!(s.handle_user(UserEvent::Confirm, true).is_empty());

        let replies = s.handle_hal(&HalRequest::plain("s1", HalCommand::Restore));
        assert_eq!(replies, vec![HalResponse::ack("s1", true, "restored")]);
        assert_eq!(s.state(), SessionState::InSession);
        assert!(mode.is_confui_mode());
        let frame = broker.try_pop().unwrap();
        assert_eq!(frame.source, crate::broker::FrameSource::ConfUi);

        let replies = s.handle_user(UserEvent::Confirm, true);
        let [HalResponse::Confirmation { message, sign, .. }] = replies.as_slice() else {
            panic!("expected a confirmation, got {replies:?}");
        };
        let uninterrupted = envelope::build(b"Pay $5", &[0x01, 0x02]).unwrap();
        assert_eq!(message, &uninterrupted);
        assert_eq!(sign, &sign_confirmation(&TEST_KEY, &uninterrupted));
    }

    #[test]
    fn restore_rearms_grace_period() {
        let (_, _, mut s) = started(0);
        s.grace = Duration::from_millis(60_000);
        s.handle_hal(&HalRequest::plain("s1", HalCommand::Suspend));
        s.handle_hal(&HalRequest::plain("s1", HalCommand::Restore));
        assert!(s.handle_user(UserEvent::Confirm, true).is_empty());
    }

    #[test]
    fn user_abort_sends_response_and_cleans_up() {
        let (mode, _, mut s) = started(0);
        let replies = s.handle_user(UserEvent::Abort, true);
        assert_eq!(replies, vec![HalResponse::ack("s1", false, "user aborted")]);
        assert_eq!(s.state(), SessionState::AwaitCleanup);
        assert!(mode.is_android_mode());
    }

    #[test]
    fn wrong_command_in_init_fails_the_session() {
        let (mode, _, mut s) = session(0);
        let replies = s.handle_hal(&HalRequest::plain("s1", HalCommand::Stop));
        assert_eq!(
            replies,
            vec![HalResponse::ack("s1", false, "wrong hal command")]
        );
        assert_eq!(s.state(), SessionState::AwaitCleanup);
        assert!(mode.is_android_mode());
    }

    #[test]
    fn malformed_prompt_yields_negative_ack() {
        let (mode, _, mut s) = session(0);
        let mut req = start_request();
        req.prompt = vec![0xc3, 0x28];
        let replies = s.handle_hal(&req);
        let [HalResponse::Ack { success, .. }] = replies.as_slice() else {
            panic!("expected an ack");
        };
        assert!(!success);
        assert_eq!(s.state(), SessionState::AwaitCleanup);
        assert!(mode.is_android_mode());
    }

    #[test]
    fn unknown_locale_yields_negative_ack() {
        let (_, _, mut s) = session(0);
        let mut req = start_request();
        req.locale = "xx".into();
        let replies = s.handle_hal(&req);
        let [HalResponse::Ack { success, text, .. }] = replies.as_slice() else {
            panic!("expected an ack");
        };
        assert!(!success);
        assert!(text.contains("xx"));
    }

    #[test]
    fn user_events_in_wait_stop_are_dropped() {
        let (_, _, mut s) = started(0);
        s.handle_user(UserEvent::Cancel, true);
        assert!(s.handle_user(UserEvent::Confirm, true).is_empty());
        assert_eq!(s.state(), SessionState::WaitStop);
    }
}
