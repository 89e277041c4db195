//! 网络模块
//!
//! 自动重连的 WebSocket 传输层：退避重连、心跳、发送队列和消息历史。

mod backoff;
mod config;
mod history;
#[cfg(test)]
pub(crate) mod mock;
mod socket;
mod timer;

pub use backoff::{backoff_delay, jitter, RetryState, JITTER_MAX, JITTER_MIN};
pub use config::{HeartbeatPayload, ParseFn, SocketConfig};
pub use history::{History, Inbox};
pub use socket::{ConnectionState, ResilientSocket, TransportEvent};
pub use timer::TaskHandle;
