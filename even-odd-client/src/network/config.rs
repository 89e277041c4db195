//! 传输层运行时配置

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    SessionEvent, BACKOFF_BASE, BACKOFF_MAX, DEFAULT_HEARTBEAT_MESSAGE, ENDPOINT_DEBOUNCE,
    HEARTBEAT_INTERVAL, MAX_RETRIES,
};

/// 帧解析函数
pub type ParseFn = Arc<dyn Fn(&str) -> Option<SessionEvent> + Send + Sync>;

/// 心跳内容：固定文本或每次生成
#[derive(Clone)]
pub enum HeartbeatPayload {
    Literal(String),
    Generator(Arc<dyn Fn() -> String + Send + Sync>),
}

impl HeartbeatPayload {
    pub fn render(&self) -> String {
        match self {
            HeartbeatPayload::Literal(text) => text.clone(),
            HeartbeatPayload::Generator(generate) => generate(),
        }
    }
}

impl fmt::Debug for HeartbeatPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatPayload::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            HeartbeatPayload::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

impl Default for HeartbeatPayload {
    fn default() -> Self {
        HeartbeatPayload::Literal(DEFAULT_HEARTBEAT_MESSAGE.to_string())
    }
}

/// 传输层配置
#[derive(Clone)]
pub struct SocketConfig {
    /// 是否自动重连
    pub reconnect: bool,
    /// 最大重连次数
    pub max_retries: u32,
    /// 退避基准延迟
    pub backoff_base: Duration,
    /// 退避最大延迟
    pub backoff_max: Duration,
    /// 是否发送心跳
    pub heartbeat_enabled: bool,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 心跳内容
    pub heartbeat_payload: HeartbeatPayload,
    /// 消息历史容量（0 表示不限）
    pub max_messages: usize,
    /// 帧解析函数
    pub parse: ParseFn,
    /// WebSocket 子协议
    pub subprotocol: Option<String>,
    /// 输出传输层调试日志
    pub debug: bool,
    /// 切换地址时旧连接的延迟关闭时间
    pub endpoint_debounce: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_retries: MAX_RETRIES,
            backoff_base: BACKOFF_BASE,
            backoff_max: BACKOFF_MAX,
            heartbeat_enabled: true,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_payload: HeartbeatPayload::default(),
            max_messages: 0,
            parse: Arc::new(protocol::parse),
            subprotocol: None,
            debug: false,
            endpoint_debounce: ENDPOINT_DEBOUNCE,
        }
    }
}

impl SocketConfig {
    pub fn with_reconnect(mut self, enabled: bool, max_retries: u32) -> Self {
        self.reconnect = enabled;
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_heartbeat(mut self, enabled: bool, interval: Duration) -> Self {
        self.heartbeat_enabled = enabled;
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_payload(mut self, payload: HeartbeatPayload) -> Self {
        self.heartbeat_payload = payload;
        self
    }

    pub fn with_max_messages(mut self, capacity: usize) -> Self {
        self.max_messages = capacity;
        self
    }

    /// 替换默认的帧解析函数
    pub fn with_parser<F>(mut self, parse: F) -> Self
    where
        F: Fn(&str) -> Option<SessionEvent> + Send + Sync + 'static,
    {
        self.parse = Arc::new(parse);
        self
    }

    pub fn with_subprotocol(mut self, protocol: Option<String>) -> Self {
        self.subprotocol = protocol;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_endpoint_debounce(mut self, delay: Duration) -> Self {
        self.endpoint_debounce = delay;
        self
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("reconnect", &self.reconnect)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("heartbeat_enabled", &self.heartbeat_enabled)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_payload", &self.heartbeat_payload)
            .field("max_messages", &self.max_messages)
            .field("subprotocol", &self.subprotocol)
            .field("debug", &self.debug)
            .field("endpoint_debounce", &self.endpoint_debounce)
            .finish_non_exhaustive()
    }
}
