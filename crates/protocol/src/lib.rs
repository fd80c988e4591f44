pub mod config;
pub mod messages;
pub mod validate;

pub use config::{AgentConfig, DisplayConfig, SecurityLevel, SignalingConfig};
pub use messages::{
    AudioStreamInfo, ClientReply, ControlPanelButton, DeviceInfo, DeviceMessage, DisplayInfo,
    IceServerEntry,
};
pub use validate::{Kind, ValidationError, validate};
