//! 传输层抽象
//!
//! 提供 Connector/Connection traits 使上层会话与具体传输实现解耦。
//! 连接建立后拆分为读端（FrameSource）和写端（FrameSink），
//! 分别由独立任务持有。

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{ProtocolError, Result};
use crate::CONNECT_TIMEOUT;

/// 读端收到的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// 文本帧
    Text(String),
    /// 对端发起关闭
    Close { code: Option<u16>, reason: String },
}

/// 连接器 trait（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// 建立连接
    async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<Self::Conn>;
}

/// 连接抽象 trait
pub trait Connection: Send + 'static {
    type Reader: FrameSource;
    type Writer: FrameSink;

    /// 分离读写端
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 写端
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// 发送文本帧
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// 发起关闭握手
    async fn close(&mut self, code: u16, reason: String) -> Result<()>;
}

/// 读端
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// 接收下一帧，返回 None 表示连接已结束
    async fn recv(&mut self) -> Option<Result<Incoming>>;
}

/// 检查服务器地址格式
///
/// 只做构造期检查：协议头必须是 ws:// 或 wss://，且主机部分非空
pub fn validate_endpoint(url: &str) -> Result<()> {
    let invalid = |reason: &str| ProtocolError::InvalidEndpoint {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| invalid("scheme must be ws:// or wss://"))?;

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() || authority.starts_with(':') {
        return Err(invalid("missing host"));
    }
    if authority.chars().any(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }
    Ok(())
}

// ============================================================================
// WebSocket 实现
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket 连接器
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<Self::Conn> {
        validate_endpoint(url)?;

        let mut request = url.into_client_request()?;
        if let Some(protocol) = subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|_| ProtocolError::InvalidSubprotocol(protocol.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;

        Ok(WsConnection { stream })
    }
}

/// WebSocket 连接
pub struct WsConnection {
    stream: WsStream,
}

impl Connection for WsConnection {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = self.stream.split();
        (WsReader { stream }, WsWriter { sink })
    }
}

/// WebSocket 写端
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}

/// WebSocket 读端
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsReader {
    async fn recv(&mut self) -> Option<Result<Incoming>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(text) => return Some(Ok(Incoming::Text(text))),
                Message::Close(frame) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                    return Some(Ok(Incoming::Close { code, reason }));
                }
                Message::Binary(data) => {
                    tracing::debug!("Ignoring binary frame ({} bytes)", data.len());
                }
                // ping/pong 由 tungstenite 自动处理
                _ => {}
            }
        }
    }
}
