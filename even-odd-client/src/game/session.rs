//! 会话控制器
//!
//! 把传输层事件折叠进 `SessionState`，并把渲染层的意图翻译为出站命令。
//! 渲染层只能读取 `Snapshot`、提交 `Intent`。

use chrono::{DateTime, Utc};
use protocol::{
    Board, ClientCommand, CommandBuilder, Connector, Outcome, RoomId, Slot, SlotFlags,
    DEFAULT_CLOSE_REASON, NORMAL_CLOSE_CODE, TOTAL_CELLS,
};
use tracing::{debug, info, warn};

use super::state::{Effect, ExitReason, Phase, SessionState};
use crate::error::{Result, SessionError};
use crate::network::{ConnectionState, ResilientSocket, SocketConfig, TransportEvent};

/// 渲染层可以提交的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Ready,
    Move(usize),
    Reset,
    Leave,
}

/// 会话更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// 状态或连接发生变化，需要重新渲染
    Changed(TransportEvent),
    /// 会话结束
    Exit(ExitReason),
}

/// 只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub board: Board,
    pub connection_status: ConnectionState,
    pub notification: String,
    pub player_id: Option<Slot>,
    pub joined: SlotFlags,
    pub ready: SlotFlags,
    pub started: bool,
    pub winner: Option<Outcome>,
    pub phase: Phase,
    pub retries: u32,
    pub error: Option<String>,
    /// 最近一次收到服务器消息的时间
    pub last_message_at: Option<DateTime<Utc>>,
}

/// 一次房间会话
pub struct GameSession<C: Connector> {
    socket: ResilientSocket<C>,
    state: SessionState,
    commands: CommandBuilder,
    /// 每次挂载只发送一次 join
    join_sent: bool,
    exited: Option<ExitReason>,
}

impl<C: Connector> GameSession<C> {
    pub fn new(connector: C, config: SocketConfig, room_id: impl Into<RoomId>) -> Self {
        Self {
            socket: ResilientSocket::new(connector, config),
            state: SessionState::new(),
            commands: CommandBuilder::new(room_id),
            join_sent: false,
            exited: None,
        }
    }

    /// 挂载：连接到服务器，打开后自动加入房间
    pub fn mount(&mut self, url: impl Into<String>) {
        let url = url.into();
        info!("Joining room {} via {}", self.commands.room_id(), url);
        self.socket.set_endpoint(Some(url));
    }

    pub fn room_id(&self) -> &str {
        self.commands.room_id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn socket(&self) -> &ResilientSocket<C> {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut ResilientSocket<C> {
        &mut self.socket
    }

    /// 会话是否已结束
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exited
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            board: self.state.board.clone(),
            connection_status: self.socket.status(),
            notification: self.state.notification.clone(),
            player_id: self.state.player_id,
            joined: self.state.joined,
            ready: self.state.ready,
            started: self.state.started,
            winner: self.state.winner,
            phase: self.state.phase(),
            retries: self.socket.retries(),
            error: self.socket.error().map(str::to_string),
            last_message_at: self.socket.inbox().last_received_at(),
        }
    }

    /// 等待下一次更新
    pub async fn next_update(&mut self) -> SessionUpdate {
        if let Some(reason) = self.exited {
            return SessionUpdate::Exit(reason);
        }
        let event = self.socket.next_event().await;
        match self.handle_transport(&event) {
            Some(reason) => SessionUpdate::Exit(reason),
            None => SessionUpdate::Changed(event),
        }
    }

    fn handle_transport(&mut self, event: &TransportEvent) -> Option<ExitReason> {
        match event {
            TransportEvent::Opened => {
                if !self.join_sent {
                    self.join_sent = true;
                    let join = self.commands.join();
                    if let Err(e) = self.transmit(&join) {
                        warn!("Failed to send join: {}", e);
                    }
                }
                None
            }
            TransportEvent::Message {
                event: Some(event), ..
            } => match self.state.apply(event) {
                Effect::None => None,
                Effect::Fatal(reason) => {
                    self.exit(reason);
                    Some(reason)
                }
            },
            TransportEvent::Message { raw, event: None } => {
                debug!("Dropped frame: {}", raw);
                None
            }
            TransportEvent::RetriesExhausted { attempts } => {
                warn!("Server unreachable after {} attempt(s)", attempts);
                None
            }
            TransportEvent::Error(_)
            | TransportEvent::Closing
            | TransportEvent::Closed { .. }
            | TransportEvent::ReconnectScheduled { .. }
            | TransportEvent::Reconnecting { .. }
            | TransportEvent::EndpointChanged { .. } => None,
        }
    }

    /// 执行渲染层意图，返回会话是否因此结束
    pub fn dispatch(&mut self, intent: Intent) -> Result<Option<ExitReason>> {
        match intent {
            Intent::Ready => self.ready().map(|_| None),
            Intent::Move(index) => self.make_move(index).map(|_| None),
            Intent::Reset => self.reset().map(|_| None),
            Intent::Leave => self.leave().map(Some),
        }
    }

    /// 准备
    pub fn ready(&mut self) -> Result<bool> {
        let slot = self.local_slot()?;
        let command = self.commands.ready(Some(slot));
        self.transmit(&command)
    }

    /// 落子
    ///
    /// 只在本地前提满足时发送，棋盘等 STATE_SYNC 回显后才更新
    pub fn make_move(&mut self, index: usize) -> Result<bool> {
        self.ensure_open()?;
        if index >= TOTAL_CELLS {
            return Err(SessionError::CellOutOfRange { index });
        }
        let slot = self.local_slot()?;
        if !self.state.ready[slot] {
            return Err(SessionError::MoveNotAllowed {
                reason: "not ready",
            });
        }
        if !self.state.started {
            return Err(SessionError::MoveNotAllowed {
                reason: "game not started",
            });
        }

        let command = self.commands.make_move(Some(slot), index);
        self.transmit(&command)
    }

    /// 请求重新开始
    pub fn reset(&mut self) -> Result<bool> {
        let slot = self.local_slot()?;
        let command = self.commands.reset(Some(slot));
        self.transmit(&command)
    }

    /// 离开房间并断开连接
    pub fn leave(&mut self) -> Result<ExitReason> {
        self.ensure_open()?;
        let command = self.commands.leave(self.state.player_id);
        self.transmit(&command)?;
        self.exit(ExitReason::Left);
        Ok(ExitReason::Left)
    }

    fn local_slot(&self) -> Result<Slot> {
        self.ensure_open()?;
        self.state.player_id.ok_or(SessionError::NotJoined)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.exited {
            Some(_) => Err(SessionError::SessionClosed),
            None => Ok(()),
        }
    }

    fn transmit(&mut self, command: &ClientCommand) -> Result<bool> {
        let frame = command.to_frame()?;
        let sent = self.socket.send(frame);
        if !sent {
            debug!("{:?} queued until the connection opens", command.event);
        }
        Ok(sent)
    }

    fn exit(&mut self, reason: ExitReason) {
        info!("Leaving room {}: {}", self.commands.room_id(), reason);
        self.exited = Some(reason);
        self.socket
            .disconnect(Some(NORMAL_CLOSE_CODE), Some(reason.code()));
    }
}

impl<C: Connector> Drop for GameSession<C> {
    fn drop(&mut self) {
        if self.exited.is_none() {
            self.socket
                .disconnect(Some(NORMAL_CLOSE_CODE), Some(DEFAULT_CLOSE_REASON));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::{mock_pair, MockConnector, MockPeer, MockServer};
    use std::time::Duration;

    const URL: &str = "ws://localhost:4000";

    fn config() -> SocketConfig {
        SocketConfig::default()
            .with_heartbeat(false, Duration::from_secs(25))
            .with_backoff(Duration::from_millis(100), Duration::from_millis(1000))
    }

    async fn mounted() -> (GameSession<MockConnector>, MockServer, MockPeer) {
        let (connector, mut server) = mock_pair();
        let mut session = GameSession::new(connector, config(), "123456");
        session.mount(URL);
        let peer = server.accept().await;
        while session.next_update().await != SessionUpdate::Changed(TransportEvent::Opened) {}
        (session, server, peer)
    }

    async fn deliver(session: &mut GameSession<MockConnector>, peer: &MockPeer, frame: &str) -> SessionUpdate {
        peer.push(frame);
        session.next_update().await
    }

    fn joined_frame(sender: &str) -> String {
        format!(
            r#"{{"event":"JOINED","sender":"{}","payload":{{"joinedStatus":{{"odd":true,"even":false}},"readiedStatus":{{"odd":false,"even":false}},"board":{:?},"winner":null}}}}"#,
            sender,
            vec![0; TOTAL_CELLS]
        )
    }

    fn frame_value(frame: &str) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_sent_once_per_mount() {
        let (mut session, mut server, mut peer) = mounted().await;
        let join = frame_value(&peer.next_frame().await.unwrap());
        assert_eq!(join["event"], "join");
        assert_eq!(join["roomId"], "123456");
        assert!(join["sender"].is_null());

        // 断线重连后不会再次加入
        peer.close(1006, "lost");
        while session.next_update().await != SessionUpdate::Changed(TransportEvent::Opened) {}
        let mut peer = server.accept().await;
        assert_eq!(server.attempts(), 2);

        // 新连接上的第一帧是这里发出的标记帧，而不是第二个 join
        assert!(session.socket_mut().send("marker"));
        assert_eq!(peer.next_frame().await.as_deref(), Some("marker"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session_flow() {
        let (mut session, _server, mut peer) = mounted().await;
        peer.next_frame().await; // join
        assert!(session.snapshot().last_message_at.is_none());

        deliver(&mut session, &peer, &joined_frame("odd")).await;
        assert_eq!(session.snapshot().player_id, Some(Slot::Odd));
        assert!(session.snapshot().last_message_at.is_some());
        assert_eq!(session.snapshot().phase, Phase::WaitingForOpponent);

        // 未开始时不能落子
        assert!(matches!(
            session.make_move(0),
            Err(SessionError::MoveNotAllowed { .. })
        ));

        assert!(session.ready().unwrap());
        let ready = frame_value(&peer.next_frame().await.unwrap());
        assert_eq!(ready["event"], "ready");
        assert_eq!(ready["sender"], "odd");

        deliver(&mut session, &peer, r#"{"event":"PLAYER_JOINED","sender":"even","payload":{}}"#).await;
        deliver(&mut session, &peer, r#"{"event":"PLAYER_READIED","sender":"odd","payload":{}}"#).await;
        deliver(&mut session, &peer, r#"{"event":"PLAYER_READIED","sender":"even","payload":{}}"#).await;
        let start = format!(
            r#"{{"event":"START","sender":null,"payload":{{"board":{:?}}}}}"#,
            vec![0; TOTAL_CELLS]
        );
        deliver(&mut session, &peer, &start).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::InProgress);
        assert_eq!(snapshot.connection_status, ConnectionState::Open);
        assert_eq!(snapshot.notification, "Game started!");

        // 落子不会直接修改棋盘
        assert!(session.dispatch(Intent::Move(12)).unwrap().is_none());
        let mv = frame_value(&peer.next_frame().await.unwrap());
        assert_eq!(mv["event"], "move");
        assert_eq!(mv["payload"]["index"], 12);
        assert_eq!(session.state().board.get(12), Some(0));

        deliver(&mut session, &peer, r#"{"event":"STATE_SYNC","sender":"odd","payload":{"index":12,"value":1}}"#).await;
        assert_eq!(session.state().board.get(12), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_guard() {
        let (mut session, _server, _peer) = mounted().await;
        assert!(matches!(session.make_move(3), Err(SessionError::NotJoined)));
        assert!(matches!(
            session.make_move(TOTAL_CELLS),
            Err(SessionError::CellOutOfRange { index: TOTAL_CELLS })
        ));
        assert!(matches!(session.ready(), Err(SessionError::NotJoined)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_full_exits() {
        let (mut session, _server, mut peer) = mounted().await;
        peer.next_frame().await; // join

        let update = deliver(
            &mut session,
            &peer,
            r#"{"event":"FULL","sender":null,"payload":{"message":"Room is full"}}"#,
        )
        .await;
        assert_eq!(update, SessionUpdate::Exit(ExitReason::RoomFull));
        assert_eq!(session.exit_reason(), Some(ExitReason::RoomFull));
        assert_eq!(session.snapshot().connection_status, ConnectionState::Closed);
        assert_eq!(peer.next_close().await, Some((1000, "room_full".to_string())));

        assert_eq!(session.next_update().await, SessionUpdate::Exit(ExitReason::RoomFull));
        assert!(matches!(session.ready(), Err(SessionError::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_exits() {
        let (mut session, _server, peer) = mounted().await;
        let update = deliver(&mut session, &peer, r#"{"event":"ERROR","payload":{}}"#).await;
        assert_eq!(update, SessionUpdate::Exit(ExitReason::ServerError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_sends_and_disconnects() {
        let (mut session, _server, mut peer) = mounted().await;
        peer.next_frame().await; // join
        deliver(&mut session, &peer, &joined_frame("even")).await;

        assert_eq!(session.dispatch(Intent::Leave).unwrap(), Some(ExitReason::Left));
        let leave = frame_value(&peer.next_frame().await.unwrap());
        assert_eq!(leave["event"], "leave");
        assert_eq!(leave["sender"], "even");
        assert_eq!(peer.next_close().await, Some((1000, "left".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_not_applied() {
        let (mut session, _server, peer) = mounted().await;
        let before = session.state().clone();

        for frame in ["not json", r#"{"event":"START","payload":{"board":[0,0]}}"#] {
            let update = deliver(&mut session, &peer, frame).await;
            assert!(matches!(
                update,
                SessionUpdate::Changed(TransportEvent::Message { event: None, .. })
            ));
        }
        assert_eq!(session.state(), &before);
        assert_eq!(session.socket().inbox().raw_history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_gracefully() {
        let (session, _server, mut peer) = mounted().await;
        drop(session);
        assert_eq!(
            peer.next_close().await,
            Some((1000, DEFAULT_CLOSE_REASON.to_string()))
        );
    }
}
