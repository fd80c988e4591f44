use std::collections::VecDeque;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::broker::FrameBroker;
use crate::hal::{self, HalCommand, HalRequest, HalResponse, TestEvent};
use crate::mode::ModeCtrl;
use crate::render::DisplayGeometry;
use crate::session::{Session, SessionState, UserEvent};
use crate::sign::KEY_BYTES;

const QUEUE_CAP: usize = 128;

#[derive(Debug)]
enum ServerEvent {
    Hal(HalRequest),
    HalDisconnected,
    User { event: UserEvent, secure: bool },
}

struct Queues {
    // HAL events outrank user input.
    hal: VecDeque<ServerEvent>,
    user: VecDeque<ServerEvent>,
    shutdown: bool,
}

struct Shared {
    queues: Mutex<Queues>,
    available: Condvar,
    writer: Mutex<Option<UnixStream>>,
}

impl Shared {
    fn push_hal(&self, event: ServerEvent) {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if q.hal.len() == QUEUE_CAP {
            warn!("hal queue full, dropping newest event");
            return;
        }
        q.hal.push_back(event);
        self.available.notify_one();
    }

    fn push_user(&self, event: ServerEvent) {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        if q.user.len() == QUEUE_CAP {
            warn!("user input queue full, dropping newest event");
            return;
        }
        q.user.push_back(event);
        self.available.notify_one();
    }

    /// Block until an event is queued or shutdown is requested. HAL events
    /// drain before user input.
    fn pop(&self) -> Option<ServerEvent> {
        let mut q = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(e) = q.hal.pop_front() {
                return Some(e);
            }
            if let Some(e) = q.user.pop_front() {
                return Some(e);
            }
            if q.shutdown {
                return None;
            }
            q = self.available.wait(q).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Handle the InputRouter uses to hand stolen touch events to the
/// confirmation UI.
#[derive(Clone)]
pub struct UserInputSender {
    shared: Arc<Shared>,
}

impl UserInputSender {
    /// Touch-down from the trusted local input path.
    pub fn touch(&self, x: u32, y: u32) {
        self.shared.push_user(ServerEvent::User {
            event: UserEvent::Touch { x, y },
            secure: true,
        });
    }

    pub fn abort(&self) {
        self.shared.push_user(ServerEvent::User {
            event: UserEvent::Abort,
            secure: true,
        });
    }
}

/// Owns the current session and applies events to it in queue order.
struct Dispatcher {
    mode: Arc<ModeCtrl>,
    broker: Arc<FrameBroker>,
    geometry: DisplayGeometry,
    key: [u8; KEY_BYTES],
    grace: Duration,
    current: Option<Session>,
}

impl Dispatcher {
    fn dispatch(&mut self, event: ServerEvent) -> Vec<HalResponse> {
        let replies = match event {
            ServerEvent::Hal(req) => self.dispatch_hal(req),
            ServerEvent::User { event, secure } => match self.current.as_mut() {
                Some(session) => session.handle_user(event, secure),
                None => {
                    debug!(?event, "user input with no confui session, dropped");
                    Vec::new()
                }
            },
            ServerEvent::HalDisconnected => {
                if let Some(mut session) = self.current.take() {
                    warn!(session = %session.id(), "hal disconnected mid-session");
                    session.cleanup();
                }
                Vec::new()
            }
        };
        self.reap();
        replies
    }

    fn dispatch_hal(&mut self, req: HalRequest) -> Vec<HalResponse> {
        if req.command == HalCommand::TestInput {
            let Some(session) = self.current.as_mut() else {
                info!(session = %req.session_id, "test input with no session, dropped");
                return Vec::new();
            };
            let event = match req.event {
                Some(TestEvent::Confirm) => UserEvent::Confirm,
                Some(TestEvent::Cancel) => UserEvent::Cancel,
                None => {
                    return vec![HalResponse::ack(
                        &req.session_id,
                        false,
                        "test_input without event",
                    )];
                }
            };
            return session.handle_user(event, false);
        }

        match self.current.as_mut() {
            Some(session) if session.id() == req.session_id => session.handle_hal(&req),
            Some(session) => {
                warn!(
                    active = %session.id(),
                    requested = %req.session_id,
                    "hal command for a different session"
                );
                vec![HalResponse::ack(
                    &req.session_id,
                    false,
                    "another session is active",
                )]
            }
            None if req.command == HalCommand::Start => {
                let mut session = Session::new(
                    req.session_id.clone(),
                    Arc::clone(&self.mode),
                    Arc::clone(&self.broker),
                    self.geometry,
                    self.key,
                    self.grace,
                );
                let replies = session.handle_hal(&req);
                self.current = Some(session);
                replies
            }
            None => {
                info!(session = %req.session_id, command = ?req.command,
                      "hal command with no session, dropped");
                Vec::new()
            }
        }
    }

    /// Destroy a session that has reached its cleanup state.
    fn reap(&mut self) {
        if let Some(session) = self.current.as_mut()
            && session.state() == SessionState::AwaitCleanup
        {
            session.cleanup();
            self.current = None;
        }
    }
}

/// Confirmation-UI server: listens on the HAL socket, fans HAL commands and
/// user input into the session FSM, and writes every response back to the
/// connected HAL.
pub struct ConfUiServer {
    shared: Arc<Shared>,
    socket_path: PathBuf,
}

impl ConfUiServer {
    pub fn start(
        socket_path: &Path,
        mode: Arc<ModeCtrl>,
        broker: Arc<FrameBroker>,
        geometry: DisplayGeometry,
        key: [u8; KEY_BYTES],
        grace: Duration,
    ) -> io::Result<Self> {
        // A stale socket file from a previous run blocks the bind.
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "confui hal socket listening");

        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                hal: VecDeque::new(),
                user: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
            writer: Mutex::new(None),
        });

        {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("confui-accept".into())
                .spawn(move || accept_loop(listener, shared))?;
        }
        {
            let shared = Arc::clone(&shared);
            let mut dispatcher = Dispatcher {
                mode,
                broker,
                geometry,
                key,
                grace,
                current: None,
            };
            std::thread::Builder::new()
                .name("confui-main".into())
                .spawn(move || {
                    while let Some(event) = shared.pop() {
                        for reply in dispatcher.dispatch(event) {
                            send_reply(&shared, &reply);
                        }
                    }
                    debug!("confui main loop exiting");
                })?;
        }

        Ok(Self {
            shared,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn user_input_sender(&self) -> UserInputSender {
        UserInputSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn shutdown(&self) {
        let mut q = self.shared.queues.lock().unwrap_or_else(|e| e.into_inner());
        q.shutdown = true;
        self.shared.available.notify_all();
    }
}

impl Drop for ConfUiServer {
    fn drop(&mut self) {
        self.shutdown();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn send_reply(shared: &Shared, reply: &HalResponse) {
    let mut writer = shared.writer.lock().unwrap_or_else(|e| e.into_inner());
    let Some(stream) = writer.as_mut() else {
        warn!(session = %reply.session_id(), "no hal connection, response dropped");
        return;
    };
    if let Err(e) = hal::write_frame(stream, reply) {
        error!("failed to write hal response: {e}");
        *writer = None;
    }
}

fn accept_loop(listener: UnixListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("hal socket accept failed: {e}");
                continue;
            }
        };
        info!("hal connected");
        match stream.try_clone() {
            Ok(write_half) => {
                let mut writer = shared.writer.lock().unwrap_or_else(|e| e.into_inner());
                *writer = Some(write_half);
            }
            Err(e) => {
                error!("failed to clone hal stream: {e}");
                continue;
            }
        }
        read_loop(stream, &shared);
        info!("hal disconnected");
        shared.push_hal(ServerEvent::HalDisconnected);
    }
}

fn read_loop(mut stream: UnixStream, shared: &Shared) {
    loop {
        match hal::read_frame::<_, HalRequest>(&mut stream) {
            Ok(req) => shared.push_hal(ServerEvent::Hal(req)),
            Err(hal::WireError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                error!("hal read failed: {e}");
                return;
            }
        }
    }
}
