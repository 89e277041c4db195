//! 协议常量定义

use std::time::Duration;

/// 棋盘边长
pub const SIZE: usize = 5;

/// 棋盘格子总数（SIZE²）
pub const TOTAL_CELLS: usize = SIZE * SIZE;

/// 空格子的编码
pub const EMPTY_CELL: i32 = 0;

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:4000";

/// 默认心跳内容（非 JSON 文本帧）
pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "PING";

/// 客户端心跳间隔（毫秒）
pub const HEARTBEAT_INTERVAL_MS: u64 = 25_000;

/// 重连退避基准延迟（毫秒）
pub const BACKOFF_BASE_MS: u64 = 500;

/// 重连退避最大延迟（毫秒）
pub const BACKOFF_MAX_MS: u64 = 10_000;

/// 最大重连次数
pub const MAX_RETRIES: u32 = 10;

/// 切换服务器地址时旧连接的延迟关闭时间（毫秒）
pub const ENDPOINT_DEBOUNCE_MS: u64 = 250;

/// 正常关闭码
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// 主动断开时的默认原因
pub const DEFAULT_CLOSE_REASON: &str = "Client disconnect";

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 心跳间隔 Duration
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(HEARTBEAT_INTERVAL_MS);

/// 退避基准 Duration
pub const BACKOFF_BASE: Duration = Duration::from_millis(BACKOFF_BASE_MS);

/// 退避上限 Duration
pub const BACKOFF_MAX: Duration = Duration::from_millis(BACKOFF_MAX_MS);

/// 地址切换防抖 Duration
pub const ENDPOINT_DEBOUNCE: Duration = Duration::from_millis(ENDPOINT_DEBOUNCE_MS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
