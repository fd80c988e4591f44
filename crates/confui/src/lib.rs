//! Trusted-display ("protected confirmation") subsystem.
//!
//! While a confirmation prompt is on screen the device is in ConfUI mode:
//! the regular Android frame path is pre-empted, touch input is captured and
//! hit-tested against the prompt's OK/CANCEL regions, and a positive answer
//! produces an HMAC-signed CBOR envelope for the guest HAL. Everything here
//! is synchronous; the agent talks to it through [`broker::FrameBroker`],
//! [`mode::ModeCtrl`] and [`server::UserInputSender`].

pub mod broker;
pub mod envelope;
pub mod hal;
pub mod mode;
pub mod render;
pub mod server;
pub mod session;
pub mod sign;

pub use broker::{Frame, FrameBroker, FrameSource};
pub use mode::{Mode, ModeCtrl};
pub use server::{ConfUiServer, UserInputSender};
