//! STOMP wire protocol used between the session and the broker

mod frame;
mod heartbeat;

pub use frame::{Command, Frame, FrameParser, Inbound, Parsed};
pub use heartbeat::{HeartBeat, Negotiated, INCOMING_TOLERANCE};
