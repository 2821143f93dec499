//! Live service protocol
//!
//! - `messages` - outbound client messages and inbound server events
//! - `classifier` - routes inbound frames to control handling or playback
//! - `transport` - transport traits and the WebSocket implementation
//! - `in_memory` - scriptable in-process transport
//! - `failure` - session failure taxonomy
//! - `protocol` - the session state machine

pub mod classifier;
pub mod failure;
pub mod in_memory;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use classifier::{
    Classified, ClassifyError, DeferredPayload, FrameClassifier, InboundFrame, ReaderPayload,
};
pub use failure::{SessionFailure, TransportFault};
pub use in_memory::{InMemoryConnector, RemotePeer};
pub use messages::{ClientMessage, ServerContent, ServerEvent};
pub use protocol::{
    Command, MessageSource, ProtocolConfig, SessionEvent, SessionMachine, SessionPhase,
    StatusLevel,
};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
