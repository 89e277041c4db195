//! 奇偶棋共享协议库
//!
//! 包含:
//! - 座位、棋盘、对局结果等核心数据结构
//! - 入站事件定义与解析 (SessionEvent, parse)
//! - 出站命令构造 (ClientCommand, CommandBuilder)
//! - 传输层抽象 (Connector, Connection, FrameSink, FrameSource traits)
//! - WebSocket 传输实现

mod command;
mod constants;
mod error;
mod message;
mod parser;
mod transport;

pub use command::CommandBuilder;
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use message::{
    Board, ClientCommand, CommandKind, EventKind, InboundEnvelope, Outcome, RoomId,
    SessionEvent, Slot, SlotFlags,
};
pub use parser::{decode, decode_envelope, parse};
pub use transport::{
    validate_endpoint, Connection, Connector, FrameSink, FrameSource, Incoming,
    WsConnection, WsConnector, WsReader, WsWriter,
};
