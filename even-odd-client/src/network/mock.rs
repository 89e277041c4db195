//! 测试用的内存连接器
//!
//! `MockServer` 一侧可以拒绝连接、推送帧、观察客户端发出的帧以及关闭连接。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use protocol::{Connection, Connector, FrameSink, FrameSource, Incoming, ProtocolError, Result};

#[derive(Default)]
struct Shared {
    refuse: u32,
    attempts: u32,
    urls: Vec<String>,
}

/// 创建一对连接器 / 服务端句柄
pub(crate) fn mock_pair() -> (MockConnector, MockServer) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            shared: shared.clone(),
            peers: peers_tx,
        },
        MockServer { shared, peers: peers_rx },
    )
}

pub(crate) struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self, url: &str, _subprotocol: Option<&str>) -> Result<MockConnection> {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.attempts += 1;
            shared.urls.push(url.to_string());
            if shared.refuse > 0 {
                shared.refuse -= 1;
                return Err(ProtocolError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (close_tx, closes) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));

        let peer = MockPeer {
            to_client: Some(to_client),
            from_client,
            closes,
            fail_writes: fail_writes.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        Ok(MockConnection {
            reader: MockReader { inbound },
            writer: MockWriter {
                outbound,
                close_tx,
                fail_writes,
            },
        })
    }
}

pub(crate) struct MockServer {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    /// 拒绝接下来的 `n` 次连接
    pub fn refuse_next(&self, n: u32) {
        self.shared.lock().unwrap().refuse = n;
    }

    /// 连接尝试总次数
    pub fn attempts(&self) -> u32 {
        self.shared.lock().unwrap().attempts
    }

    /// 每次连接使用的地址
    pub fn urls(&self) -> Vec<String> {
        self.shared.lock().unwrap().urls.clone()
    }

    /// 等待下一个成功建立的连接
    pub async fn accept(&mut self) -> MockPeer {
        self.peers.recv().await.expect("connector dropped")
    }
}

/// 服务端一侧的连接句柄
pub(crate) struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<Incoming>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closes: mpsc::UnboundedReceiver<(u16, String)>,
    fail_writes: Arc<AtomicBool>,
}

impl MockPeer {
    /// 推送一帧给客户端
    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Incoming::Text(text.into()));
        }
    }

    /// 发起关闭握手后断开
    pub fn close(&mut self, code: u16, reason: &str) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Incoming::Close {
                code: Some(code),
                reason: reason.to_string(),
            });
        }
    }

    /// 直接断开（无关闭帧）
    pub fn drop_link(&mut self) {
        self.to_client = None;
    }

    /// 之后的写入全部失败
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// 等待客户端发出的下一帧
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// 已到达的帧
    pub fn drain_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// 等待客户端的关闭握手
    pub async fn next_close(&mut self) -> Option<(u16, String)> {
        self.closes.recv().await
    }
}

pub(crate) struct MockConnection {
    reader: MockReader,
    writer: MockWriter,
}

impl Connection for MockConnection {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn split(self) -> (MockReader, MockWriter) {
        (self.reader, self.writer)
    }
}

pub(crate) struct MockReader {
    inbound: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl FrameSource for MockReader {
    async fn recv(&mut self) -> Option<Result<Incoming>> {
        self.inbound.recv().await.map(Ok)
    }
}

pub(crate) struct MockWriter {
    outbound: mpsc::UnboundedSender<String>,
    close_tx: mpsc::UnboundedSender<(u16, String)>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<()> {
        self.close_tx
            .send((code, reason))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
