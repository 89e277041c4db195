//! 客户端错误类型

use protocol::ProtocolError;
use thiserror::Error;

/// 会话错误
///
/// 只覆盖本地拒绝的操作；传输层故障不会以错误形式返回
#[derive(Error, Debug)]
pub enum SessionError {
    /// 尚未分配座位
    #[error("Not joined yet")]
    NotJoined,

    /// 当前不允许落子
    #[error("Move not allowed: {reason}")]
    MoveNotAllowed { reason: &'static str },

    /// 格子下标越界
    #[error("Cell {index} is outside the board")]
    CellOutOfRange { index: usize },

    /// 会话已结束
    #[error("Session closed")]
    SessionClosed,

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
