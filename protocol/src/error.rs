//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 无效的服务器地址
    #[error("Invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// 无效的子协议标识
    #[error("Invalid sub-protocol: {0}")]
    InvalidSubprotocol(String),

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 未知事件名
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// 事件缺少发送方
    #[error("Event {event} requires a sender")]
    MissingSender { event: &'static str },

    /// 棋盘长度错误
    #[error("Board length mismatch: expected {expected}, got {actual}")]
    BoardLength { expected: usize, actual: usize },

    /// 格子索引越界
    #[error("Cell index out of range: {index} (cells: {cells})")]
    CellOutOfRange { index: usize, cells: usize },
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
