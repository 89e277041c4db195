//! 自动重连的套接字
//!
//! `ResilientSocket` 独占底层连接，对外只暴露 connect / disconnect / send。
//! 所有状态变化都在持有者任务里串行执行：读写任务和定时器只往内部信号
//! 通道投递 `Signal`，由 `next_event` 逐个处理，因此不需要任何锁。
//!
//! 每次建立连接都会递增 `generation`，旧连接或已取消定时器投递的信号
//! 会因代数不匹配被丢弃。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use protocol::{
    validate_endpoint, Connection, Connector, FrameSink, FrameSource, Incoming,
    ProtocolError, SessionEvent, DEFAULT_CLOSE_REASON, NORMAL_CLOSE_CODE,
};

use super::backoff::{backoff_delay, jitter, RetryState};
use super::config::SocketConfig;
use super::history::Inbox;
use super::timer::TaskHandle;

macro_rules! debug_log {
    ($self:ident, $($arg:tt)*) => {
        if $self.config.debug {
            tracing::debug!($($arg)*);
        }
    };
}

/// 连接状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

/// 传输层对外事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 连接已打开（队列已冲刷）
    Opened,
    /// 收到一帧，`event` 为空表示无法解析
    Message {
        raw: String,
        event: Option<SessionEvent>,
    },
    /// 连接错误（不改变连接状态）
    Error(String),
    /// 对端发起关闭
    Closing,
    /// 连接已关闭
    Closed { code: Option<u16>, reason: String },
    /// 已安排重连
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// 开始第 `attempt` 次重连
    Reconnecting { attempt: u32 },
    /// 重连次数耗尽
    RetriesExhausted { attempts: u32 },
    /// 服务器地址已切换
    EndpointChanged { url: Option<String> },
}

/// 读写任务和定时器投递的内部信号
enum Signal {
    Established {
        generation: u64,
        link: Link,
    },
    ConnectFailed {
        generation: u64,
        error: String,
        retryable: bool,
    },
    Frame {
        generation: u64,
        text: String,
    },
    PeerClosing {
        generation: u64,
        code: Option<u16>,
        reason: String,
    },
    ReadError {
        generation: u64,
        error: String,
    },
    WriteFailed {
        generation: u64,
        frames: Vec<String>,
        error: String,
    },
    HeartbeatFailed {
        generation: u64,
        error: String,
    },
    Ended {
        generation: u64,
    },
    ReconnectDue {
        generation: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
    EndpointSwitchDue {
        seq: u64,
    },
}

type SignalTx = mpsc::UnboundedSender<Signal>;

/// 写任务收到的出站内容
enum Outbound {
    Frame(String),
    Heartbeat(String),
}

impl Outbound {
    fn into_text(self) -> String {
        match self {
            Outbound::Frame(text) | Outbound::Heartbeat(text) => text,
        }
    }
}

struct CloseRequest {
    code: u16,
    reason: String,
}

/// 一条已建立的连接：写任务通道 + 读任务句柄
///
/// drop 时读任务被取消，写任务在通道关闭后自行结束
struct Link {
    tx: mpsc::UnboundedSender<Outbound>,
    close_tx: oneshot::Sender<CloseRequest>,
    _reader: TaskHandle,
}

impl Link {
    fn spawn<C: Connection>(conn: C, generation: u64, signals: SignalTx) -> Self {
        let (reader, writer) = conn.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(write_loop(writer, rx, close_rx, generation, signals.clone()));
        let reader = TaskHandle::spawn(read_loop(reader, generation, signals));

        Self {
            tx,
            close_tx,
            _reader: reader,
        }
    }

    /// 交给写任务，失败时原样返回帧
    fn transmit(&self, frame: String) -> Result<(), String> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|e| e.0.into_text())
    }

    fn heartbeat(&self, payload: String) -> bool {
        self.tx.send(Outbound::Heartbeat(payload)).is_ok()
    }

    /// 发出关闭握手；已排队的帧会先写完
    fn close(self, code: u16, reason: String) {
        let Link { close_tx, .. } = self;
        let _ = close_tx.send(CloseRequest { code, reason });
    }
}

async fn read_loop<R: FrameSource>(mut reader: R, generation: u64, signals: SignalTx) {
    while let Some(item) = reader.recv().await {
        let signal = match item {
            Ok(Incoming::Text(text)) => Signal::Frame { generation, text },
            Ok(Incoming::Close { code, reason }) => Signal::PeerClosing {
                generation,
                code,
                reason,
            },
            Err(e) => {
                let _ = signals.send(Signal::ReadError {
                    generation,
                    error: e.to_string(),
                });
                break;
            }
        };
        if signals.send(signal).is_err() {
            return;
        }
    }
    let _ = signals.send(Signal::Ended { generation });
}

async fn write_loop<W: FrameSink>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    close_rx: oneshot::Receiver<CloseRequest>,
    generation: u64,
    signals: SignalTx,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if let Err(e) = writer.send_text(text.clone()).await {
                    // 写端已不可用：把失败的帧和尚未写出的帧按顺序交还后退出，
                    // 由持有者按断线处理
                    rx.close();
                    let mut frames = vec![text];
                    while let Ok(pending) = rx.try_recv() {
                        if let Outbound::Frame(frame) = pending {
                            frames.push(frame);
                        }
                    }
                    let _ = signals.send(Signal::WriteFailed {
                        generation,
                        frames,
                        error: e.to_string(),
                    });
                    return;
                }
            }
            Outbound::Heartbeat(payload) => {
                if let Err(e) = writer.send_text(payload).await {
                    let _ = signals.send(Signal::HeartbeatFailed {
                        generation,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    if let Ok(CloseRequest { code, reason }) = close_rx.await {
        if let Err(e) = writer.close(code, reason).await {
            tracing::debug!("Error while closing connection: {}", e);
        }
    }
}

/// 自动重连的套接字
pub struct ResilientSocket<C: Connector> {
    connector: Arc<C>,
    config: SocketConfig,
    url: Option<String>,
    /// 防抖中的新地址
    pending_url: Option<Option<String>>,
    status: ConnectionState,
    retry: RetryState,
    /// 下一次重连的序号（定时器触发时写入 retry.attempts）
    pending_attempt: u32,
    exhausted: bool,
    queue: VecDeque<String>,
    inbox: Inbox,
    error: Option<String>,
    close_info: Option<(Option<u16>, String)>,
    generation: u64,
    /// 最近一次成功打开的连接代数
    opened_generation: u64,
    switch_seq: u64,
    link: Option<Link>,
    connecting: Option<TaskHandle>,
    reconnect_timer: Option<TaskHandle>,
    heartbeat_timer: Option<TaskHandle>,
    switch_timer: Option<TaskHandle>,
    signal_tx: SignalTx,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    events: VecDeque<TransportEvent>,
}

impl<C: Connector> ResilientSocket<C> {
    /// 创建套接字（不会立即连接）
    pub fn new(connector: C, config: SocketConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let inbox = Inbox::new(config.max_messages);
        Self {
            connector: Arc::new(connector),
            config,
            url: None,
            pending_url: None,
            status: ConnectionState::Closed,
            retry: RetryState::default(),
            pending_attempt: 0,
            exhausted: false,
            queue: VecDeque::new(),
            inbox,
            error: None,
            close_info: None,
            generation: 0,
            opened_generation: 0,
            switch_seq: 0,
            link: None,
            connecting: None,
            reconnect_timer: None,
            heartbeat_timer: None,
            switch_timer: None,
            signal_tx,
            signal_rx,
            events: VecDeque::new(),
        }
    }

    // ------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionState::Open
    }

    /// 当前重连次数
    pub fn retries(&self) -> u32 {
        self.retry.attempts
    }

    /// 重连次数是否已耗尽
    pub fn retries_exhausted(&self) -> bool {
        self.exhausted
    }

    /// 最近一次连接错误
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// 清空消息历史
    pub fn clear_messages(&mut self) {
        self.inbox.clear();
    }

    /// 等待发送的帧
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // 命令
    // ------------------------------------------------------------------

    /// 切换服务器地址
    ///
    /// 首次设置立即连接；之后的切换经过防抖，窗口内切回原地址则什么都不做。
    /// 设为 None 等价于延迟断开。
    pub fn set_endpoint(&mut self, url: Option<String>) {
        if url == self.url {
            if self.pending_url.take().is_some() {
                self.switch_timer = None;
                debug_log!(self, "Endpoint change cancelled");
            }
            return;
        }

        if self.url.is_none() && self.link.is_none() && self.connecting.is_none() {
            self.apply_endpoint(url);
            return;
        }

        self.pending_url = Some(url);
        self.switch_seq += 1;
        let seq = self.switch_seq;
        let signals = self.signal_tx.clone();
        self.switch_timer = Some(TaskHandle::after(self.config.endpoint_debounce, move || {
            let _ = signals.send(Signal::EndpointSwitchDue { seq });
        }));
    }

    /// 建立连接。正在连接或已打开时不做任何事
    pub fn connect(&mut self) {
        let Some(url) = self.url.clone() else {
            debug_log!(self, "Skip connect: no endpoint");
            return;
        };
        if matches!(
            self.status,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug_log!(self, "Skip connect: existing connection is active");
            return;
        }

        self.retry.manually_closed = false;
        self.error = None;
        self.drop_link();

        if let Err(e) = validate_endpoint(&url) {
            // 构造失败不安排重连
            warn!("Cannot connect to {}: {}", url, e);
            self.status = ConnectionState::Closed;
            self.error = Some(e.to_string());
            self.events.push_back(TransportEvent::Error(e.to_string()));
            return;
        }

        self.generation += 1;
        self.status = ConnectionState::Connecting;
        debug_log!(self, "Connecting to {} (generation {})", url, self.generation);

        let generation = self.generation;
        let connector = self.connector.clone();
        let subprotocol = self.config.subprotocol.clone();
        let signals = self.signal_tx.clone();
        self.connecting = Some(TaskHandle::spawn(async move {
            match connector.connect(&url, subprotocol.as_deref()).await {
                Ok(conn) => {
                    let link = Link::spawn(conn, generation, signals.clone());
                    let _ = signals.send(Signal::Established { generation, link });
                }
                Err(e) => {
                    let retryable = !matches!(
                        e,
                        ProtocolError::InvalidEndpoint { .. } | ProtocolError::InvalidSubprotocol(_)
                    );
                    let _ = signals.send(Signal::ConnectFailed {
                        generation,
                        error: e.to_string(),
                        retryable,
                    });
                }
            }
        }));
    }

    /// 显式重连：清除主动断开标记、重置计数后连接
    pub fn reconnect(&mut self) {
        self.reconnect_timer = None;
        self.retry.rearm();
        self.exhausted = false;
        self.connect();
    }

    /// 主动断开
    ///
    /// 取消所有定时器并立即进入 Closed，此后不会再自动重连
    pub fn disconnect(&mut self, code: Option<u16>, reason: Option<&str>) {
        self.retry.manually_closed = true;
        self.cancel_timers();
        self.pending_url = None;

        if let Some(link) = self.link.take() {
            link.close(
                code.unwrap_or(NORMAL_CLOSE_CODE),
                reason.unwrap_or(DEFAULT_CLOSE_REASON).to_string(),
            );
        }

        self.generation += 1;
        self.close_info = None;
        self.status = ConnectionState::Closed;
        info!("Disconnected");
    }

    /// 发送一帧
    ///
    /// 返回是否已立即交给连接；未打开或交付失败时进入发送队列并返回 false
    pub fn send(&mut self, frame: impl Into<String>) -> bool {
        let frame = frame.into();
        if self.status == ConnectionState::Open {
            if let Some(link) = &self.link {
                match link.transmit(frame) {
                    Ok(()) => return true,
                    Err(frame) => {
                        debug_log!(self, "Transmit failed, queueing frame");
                        self.queue.push_back(frame);
                        return false;
                    }
                }
            }
        }
        self.queue.push_back(frame);
        false
    }

    /// 序列化后发送
    pub fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(frame) => self.send(frame),
            Err(e) => {
                warn!("Failed to serialize outgoing frame: {}", e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // 事件循环
    // ------------------------------------------------------------------

    /// 等待下一个传输层事件
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.events.pop_front() {
                return event;
            }
            if let Some(signal) = self.signal_rx.recv().await {
                self.handle_signal(signal);
            }
        }
    }

    /// 非阻塞地取出已就绪的事件
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let signal = self.signal_rx.try_recv().ok()?;
            self.handle_signal(signal);
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Established { generation, link } => {
                if generation != self.generation || self.status != ConnectionState::Connecting {
                    link.close(NORMAL_CLOSE_CODE, DEFAULT_CLOSE_REASON.to_string());
                    return;
                }
                self.on_open(link);
            }
            Signal::ConnectFailed {
                generation,
                error,
                retryable,
            } => {
                if generation != self.generation {
                    return;
                }
                self.connecting = None;
                warn!("Connection failed: {}", error);
                self.error = Some(error.clone());
                self.events.push_back(TransportEvent::Error(error.clone()));
                if retryable {
                    self.on_closed(None, error);
                } else {
                    self.status = ConnectionState::Closed;
                    self.events.push_back(TransportEvent::Closed {
                        code: None,
                        reason: error,
                    });
                }
            }
            Signal::Frame { generation, text } => {
                if generation != self.generation {
                    return;
                }
                let parsed = (self.config.parse)(&text);
                if parsed.is_none() {
                    debug_log!(self, "Unparsable frame: {}", text);
                }
                self.inbox.record(&text, parsed.as_ref());
                self.events.push_back(TransportEvent::Message {
                    raw: text,
                    event: parsed,
                });
            }
            Signal::PeerClosing {
                generation,
                code,
                reason,
            } => {
                if generation != self.generation {
                    return;
                }
                debug_log!(self, "Peer closing: {:?} {}", code, reason);
                self.status = ConnectionState::Closing;
                self.close_info = Some((code, reason));
                self.events.push_back(TransportEvent::Closing);
            }
            Signal::ReadError { generation, error } => {
                if generation != self.generation {
                    return;
                }
                warn!("Connection error: {}", error);
                self.error = Some(error.clone());
                self.events.push_back(TransportEvent::Error(error));
            }
            Signal::WriteFailed {
                generation,
                frames,
                error,
            } => {
                // 更新的连接已冲刷过队列，放回队首会打乱顺序
                if self.opened_generation > generation {
                    warn!(
                        "Dropping {} frame(s) from a replaced connection: {}",
                        frames.len(),
                        error
                    );
                    return;
                }
                warn!("Write failed, re-queueing {} frame(s): {}", frames.len(), error);
                for frame in frames.into_iter().rev() {
                    self.queue.push_front(frame);
                }
                if generation == self.generation {
                    // 写任务已退出，连接不可再用：丢弃旧代的读端信号，进入重连
                    self.error = Some(error.clone());
                    self.events.push_back(TransportEvent::Error(error.clone()));
                    self.generation += 1;
                    self.close_info = None;
                    self.on_closed(None, error);
                }
            }
            Signal::HeartbeatFailed { generation, error } => {
                if generation == self.generation {
                    warn!("Heartbeat send failed: {}", error);
                }
            }
            Signal::Ended { generation } => {
                if generation != self.generation {
                    return;
                }
                let (code, reason) = self.close_info.take().unwrap_or((None, String::new()));
                self.on_closed(code, reason);
            }
            Signal::ReconnectDue { generation } => {
                if generation != self.generation || self.retry.manually_closed {
                    return;
                }
                self.reconnect_timer = None;
                self.retry.attempts = self.pending_attempt;
                info!(
                    "Reconnecting (attempt {}/{})",
                    self.retry.attempts, self.config.max_retries
                );
                self.events.push_back(TransportEvent::Reconnecting {
                    attempt: self.retry.attempts,
                });
                self.connect();
            }
            Signal::HeartbeatTick { generation } => {
                if generation != self.generation || self.status != ConnectionState::Open {
                    return;
                }
                let Some(link) = &self.link else {
                    return;
                };
                if link.heartbeat(self.config.heartbeat_payload.render()) {
                    debug_log!(self, "Heartbeat sent");
                } else {
                    warn!("Heartbeat send failed: writer is gone");
                }
            }
            Signal::EndpointSwitchDue { seq } => {
                if seq != self.switch_seq {
                    return;
                }
                self.switch_timer = None;
                if let Some(url) = self.pending_url.take() {
                    self.apply_endpoint(url);
                }
            }
        }
    }

    fn on_open(&mut self, link: Link) {
        info!("Connection open");
        self.connecting = None;
        self.link = Some(link);
        self.opened_generation = self.generation;
        self.status = ConnectionState::Open;
        self.retry.on_open();
        self.exhausted = false;
        self.start_heartbeat();
        self.flush_queue();
        self.events.push_back(TransportEvent::Opened);
    }

    fn on_closed(&mut self, code: Option<u16>, reason: String) {
        debug_log!(self, "Connection closed: {:?} {}", code, reason);
        self.drop_link();
        self.heartbeat_timer = None;
        self.status = ConnectionState::Closed;
        self.events.push_back(TransportEvent::Closed { code, reason });
        if !self.retry.manually_closed {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.config.reconnect || self.retry.manually_closed || self.url.is_none() {
            return;
        }

        let Some(attempt) = self.retry.next_attempt(self.config.max_retries) else {
            warn!(
                "Giving up after {} reconnection attempt(s)",
                self.retry.attempts
            );
            self.exhausted = true;
            self.events.push_back(TransportEvent::RetriesExhausted {
                attempts: self.retry.attempts,
            });
            return;
        };

        let raw = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
        let delay = jitter(raw, &mut rand::thread_rng());
        debug_log!(
            self,
            "Reconnecting in ~{:?} (attempt {}/{})",
            delay,
            attempt,
            self.config.max_retries
        );

        self.pending_attempt = attempt;
        let generation = self.generation;
        let signals = self.signal_tx.clone();
        self.reconnect_timer = Some(TaskHandle::after(delay, move || {
            let _ = signals.send(Signal::ReconnectDue { generation });
        }));
        self.events
            .push_back(TransportEvent::ReconnectScheduled { attempt, delay });
    }

    fn start_heartbeat(&mut self) {
        self.heartbeat_timer = None;
        if !self.config.heartbeat_enabled || self.config.heartbeat_interval.is_zero() {
            return;
        }
        let generation = self.generation;
        let signals = self.signal_tx.clone();
        self.heartbeat_timer = Some(TaskHandle::every(
            self.config.heartbeat_interval,
            move || {
                let _ = signals.send(Signal::HeartbeatTick { generation });
            },
        ));
    }

    /// 按到达顺序冲刷发送队列，遇到第一次失败即停止
    fn flush_queue(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        while let Some(frame) = self.queue.pop_front() {
            if let Err(frame) = link.transmit(frame) {
                self.queue.push_front(frame);
                debug_log!(self, "Failed to flush queued frame");
                break;
            }
        }
    }

    fn apply_endpoint(&mut self, url: Option<String>) {
        self.cancel_timers();
        if let Some(link) = self.link.take() {
            link.close(NORMAL_CLOSE_CODE, "Endpoint changed".to_string());
        }
        self.generation += 1;
        self.close_info = None;
        self.status = ConnectionState::Closed;
        self.retry.rearm();
        self.exhausted = false;

        info!("Endpoint set to {:?}", url);
        self.url = url.clone();
        self.events
            .push_back(TransportEvent::EndpointChanged { url });
        if self.url.is_some() {
            self.connect();
        }
    }

    /// 丢弃当前连接（不发送关闭握手）
    fn drop_link(&mut self) {
        self.link = None;
        self.connecting = None;
    }

    fn cancel_timers(&mut self) {
        self.connecting = None;
        self.reconnect_timer = None;
        self.heartbeat_timer = None;
        self.switch_timer = None;
    }
}
