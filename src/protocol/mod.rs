//! 决策者协议：消息、编解码、传输与会话

pub mod codec;
mod message;
mod session;
mod transport;

pub use message::{
    CompletionState, Decision, Envelope, JobDescription, PROTOCOL_VERSION, ResourceInfo, SimEvent,
};
pub use session::{ProtocolSession, Reply};
pub use transport::{ChannelPeer, ChannelTransport, Transport, UnixSocketTransport};
