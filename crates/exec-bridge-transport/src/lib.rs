//! WebSocket transport for remote exec sessions.
//!
//! Provides:
//! - Wire protocol (tag byte + base64)
//! - Inbound and outbound relays
//! - Session orchestration
//! - Axum router (feature: websocket)

pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::ChannelGuard;
pub use config::RelayConfig;
pub use error::BridgeError;
pub use protocol::{DecodeError, FrameTag, decode_frame, encode_data};
pub use session::{SessionId, SessionOutcome, run_session};

#[cfg(feature = "websocket")]
pub use websocket::{BridgeState, create_router};
