//! 奇偶棋客户端
//!
//! 自动重连的 WebSocket 传输层加上由服务端事件驱动的房间会话状态机

pub mod error;
pub mod game;
pub mod network;
pub mod settings;

pub use error::{Result, SessionError};
pub use game::{
    Effect, ExitReason, GameSession, Intent, Phase, SessionState, SessionUpdate, Snapshot,
};
pub use network::{ConnectionState, ResilientSocket, SocketConfig, TransportEvent};
pub use settings::{ClientSettings, LogLevel, NetworkSettings};

/// 房间号长度
pub const ROOM_ID_LEN: usize = 6;

/// 房间号是否为 6 位数字
pub fn is_valid_room_id(room_id: &str) -> bool {
    room_id.len() == ROOM_ID_LEN && room_id.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_validation() {
        assert!(is_valid_room_id("123456"));
        assert!(is_valid_room_id("000000"));
        assert!(!is_valid_room_id("12345"));
        assert!(!is_valid_room_id("1234567"));
        assert!(!is_valid_room_id("12a456"));
        assert!(!is_valid_room_id("１２３４５６"));
    }
}
