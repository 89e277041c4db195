//! 会话状态机
//!
//! 只由服务端事件驱动：本地命令不会直接修改状态，落子也要等 STATE_SYNC 回显。

use std::fmt;

use protocol::{Board, EventKind, Outcome, SessionEvent, Slot, SlotFlags};
use tracing::{debug, warn};

/// 会话阶段，由 joined / ready / started / winner 推导，不单独存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// 尚未加入
    Unjoined,
    /// 等待对手加入
    WaitingForOpponent,
    /// 双方到齐，等待准备
    ReadyPhase,
    /// 对局中
    InProgress,
    /// 对局结束
    GameOver,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Unjoined => "unjoined",
            Phase::WaitingForOpponent => "waiting for opponent",
            Phase::ReadyPhase => "ready phase",
            Phase::InProgress => "in progress",
            Phase::GameOver => "game over",
        };
        f.write_str(text)
    }
}

/// 会话终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// 房间已满
    RoomFull,
    /// 服务端报错
    ServerError,
    /// 主动离开
    Left,
}

impl ExitReason {
    /// 机器可读的原因代码
    pub fn code(self) -> &'static str {
        match self {
            ExitReason::RoomFull => "room_full",
            ExitReason::ServerError => "server_error",
            ExitReason::Left => "left",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 应用事件的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// 会话必须终止
    Fatal(ExitReason),
}

/// 会话状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// 本地座位（JOINED 时由服务端分配）
    pub player_id: Option<Slot>,
    pub joined: SlotFlags,
    pub ready: SlotFlags,
    pub started: bool,
    pub board: Board,
    pub winner: Option<Outcome>,
    /// 最近一条提示
    pub notification: String,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        if self.winner.is_some() {
            Phase::GameOver
        } else if self.started {
            Phase::InProgress
        } else {
            match self.joined.count() {
                0 => Phase::Unjoined,
                1 => Phase::WaitingForOpponent,
                _ => Phase::ReadyPhase,
            }
        }
    }

    /// 本地玩家是否已准备
    pub fn is_ready(&self) -> bool {
        self.player_id.is_some_and(|slot| self.ready[slot])
    }

    /// 是否满足落子的本地前提
    pub fn can_move(&self) -> bool {
        self.is_ready() && self.started && self.winner.is_none()
    }

    /// 按到达顺序应用一个事件
    pub fn apply(&mut self, event: &SessionEvent) -> Effect {
        let sender = event.sender;
        match &event.kind {
            EventKind::Joined {
                joined,
                ready,
                board,
                winner,
            } => {
                let Some(slot) = self.require_sender(event) else {
                    return Effect::None;
                };
                self.player_id = Some(slot);
                self.joined = *joined;
                self.ready = *ready;
                self.board = board.clone();
                self.winner = *winner;
                self.notify(format!("You joined as {}. Waiting for opponent...", slot));
            }
            EventKind::Readied { ready } => {
                self.ready = *ready;
            }
            EventKind::Start { board } => {
                self.ready = SlotFlags::both(true);
                self.started = true;
                self.board = board.clone();
                self.notify("Game started!");
            }
            EventKind::Full { message } => {
                warn!("Room is full: {}", message.as_deref().unwrap_or("-"));
                return Effect::Fatal(ExitReason::RoomFull);
            }
            EventKind::Error { message } => {
                warn!("Server error: {}", message.as_deref().unwrap_or("-"));
                return Effect::Fatal(ExitReason::ServerError);
            }
            EventKind::StateSync { index, value } => {
                if self.winner.is_some() {
                    debug!("Ignoring STATE_SYNC after game over");
                    return Effect::None;
                }
                if let Err(e) = self.board.set(*index, *value) {
                    warn!("Ignoring STATE_SYNC: {}", e);
                }
            }
            EventKind::PlayerJoined => {
                let Some(slot) = self.require_sender(event) else {
                    return Effect::None;
                };
                self.joined.set(slot, true);
                self.notify(format!("Player {} joined the room", slot));
            }
            EventKind::PlayerReadied => {
                let Some(slot) = self.require_sender(event) else {
                    return Effect::None;
                };
                self.ready.set(slot, true);
                self.notify(format!("Player {} is ready", slot));
            }
            EventKind::PlayerLeftTheGame { ready } => {
                let Some(slot) = self.require_sender(event) else {
                    return Effect::None;
                };
                self.joined.set(slot, false);
                self.ready = *ready;
                self.started = false;
                self.notify(format!("Player {} left the game", slot));
            }
            EventKind::PlayerLeftTheRoom => {
                let Some(slot) = self.require_sender(event) else {
                    return Effect::None;
                };
                self.joined.set(slot, false);
                self.ready.set(slot, false);
                self.notify(format!("Player {} left the room", slot));
            }
            EventKind::GameOver { winner, ready } => {
                self.ready = *ready;
                self.started = false;
                self.winner = Some(*winner);
                self.notify(format!("Game over: {}", winner));
            }
            EventKind::Reset => {
                self.started = false;
                self.winner = None;
                self.notify("Board reset, ready up for the next round");
            }
            EventKind::ResetBoard { board } => {
                self.board = board.clone();
            }
        }

        debug!("Applied {} from {:?}, phase: {}", event.kind.name(), sender, self.phase());
        Effect::None
    }

    fn require_sender(&self, event: &SessionEvent) -> Option<Slot> {
        if event.sender.is_none() {
            warn!("{} without sender, ignored", event.kind.name());
        }
        event.sender
    }

    fn notify(&mut self, text: impl Into<String>) {
        self.notification = text.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::TOTAL_CELLS;

    fn event(sender: Option<Slot>, kind: EventKind) -> SessionEvent {
        SessionEvent::new(sender, kind)
    }

    fn joined_as_odd() -> SessionState {
        let mut state = SessionState::new();
        state.apply(&event(
            Some(Slot::Odd),
            EventKind::Joined {
                joined: SlotFlags::new(true, false),
                ready: SlotFlags::default(),
                board: Board::empty(),
                winner: None,
            },
        ));
        state
    }

    fn started_game() -> SessionState {
        let mut state = joined_as_odd();
        state.apply(&event(Some(Slot::Even), EventKind::PlayerJoined));
        state.apply(&event(
            None,
            EventKind::Start {
                board: Board::empty(),
            },
        ));
        state
    }

    #[test]
    fn test_join_ready_start_scenario() {
        let mut state = joined_as_odd();
        assert_eq!(state.player_id, Some(Slot::Odd));
        assert_eq!(state.phase(), Phase::WaitingForOpponent);
        assert!(state.notification.contains("Waiting for opponent"));

        state.apply(&event(Some(Slot::Even), EventKind::PlayerJoined));
        assert_eq!(state.phase(), Phase::ReadyPhase);

        state.apply(&event(Some(Slot::Odd), EventKind::PlayerReadied));
        state.apply(&event(Some(Slot::Even), EventKind::PlayerReadied));
        assert_eq!(state.notification, "Player EVEN is ready");

        state.apply(&event(
            None,
            EventKind::Start {
                board: Board::empty(),
            },
        ));

        assert_eq!(state.joined, SlotFlags::both(true));
        assert_eq!(state.ready, SlotFlags::both(true));
        assert!(state.started);
        assert_eq!(state.board.cells(), &[0; TOTAL_CELLS][..]);
        assert_eq!(state.phase(), Phase::InProgress);
        assert!(state.can_move());
    }

    #[test]
    fn test_game_over_on_filled_board() {
        let mut state = started_game();
        for index in 0..TOTAL_CELLS {
            state.apply(&event(None, EventKind::StateSync { index, value: 1 }));
        }

        state.apply(&event(
            None,
            EventKind::GameOver {
                winner: Outcome::Odd,
                ready: SlotFlags::both(false),
            },
        ));

        assert!(!state.started);
        assert_eq!(state.winner, Some(Outcome::Odd));
        assert_eq!(state.ready, SlotFlags::both(false));
        assert_eq!(state.phase(), Phase::GameOver);
        assert!(!state.can_move());

        // 结束后的同步被忽略
        state.apply(&event(None, EventKind::StateSync { index: 0, value: 7 }));
        assert_eq!(state.board.get(0), Some(1));
    }

    #[test]
    fn test_state_sync_is_idempotent() {
        let syncs = [(3, 1), (7, 2), (3, 3), (24, 1)];

        let mut once = started_game();
        for (index, value) in syncs {
            once.apply(&event(None, EventKind::StateSync { index, value }));
        }

        let mut twice = started_game();
        for (index, value) in syncs {
            let sync = event(None, EventKind::StateSync { index, value });
            twice.apply(&sync);
            twice.apply(&sync);
        }

        assert_eq!(once.board, twice.board);
        assert_eq!(once.board.get(3), Some(3));
        assert_eq!(once.board.get(24), Some(1));
    }

    #[test]
    fn test_out_of_range_sync_is_ignored() {
        let mut state = started_game();
        let before = state.clone();
        state.apply(&event(
            None,
            EventKind::StateSync {
                index: TOTAL_CELLS,
                value: 1,
            },
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_readied_replaces_ready_map() {
        let mut state = started_game();
        state.ready = SlotFlags::new(true, false);
        let before = state.clone();

        state.apply(&event(
            None,
            EventKind::Readied {
                ready: SlotFlags::new(false, true),
            },
        ));

        assert_eq!(state.ready, SlotFlags::new(false, true));
        assert_eq!(state.joined, before.joined);
        assert_eq!(state.started, before.started);
        assert_eq!(state.board, before.board);
        assert_eq!(state.notification, before.notification);
    }

    #[test]
    fn test_fatal_events() {
        let mut state = joined_as_odd();
        assert_eq!(
            state.apply(&event(None, EventKind::Full { message: None })),
            Effect::Fatal(ExitReason::RoomFull)
        );
        assert_eq!(
            state.apply(&event(
                None,
                EventKind::Error {
                    message: Some("boom".to_string())
                }
            )),
            Effect::Fatal(ExitReason::ServerError)
        );
        assert_eq!(ExitReason::RoomFull.code(), "room_full");
        assert_eq!(ExitReason::ServerError.code(), "server_error");
    }

    #[test]
    fn test_player_left_the_game() {
        let mut state = started_game();
        state.apply(&event(
            Some(Slot::Even),
            EventKind::PlayerLeftTheGame {
                ready: SlotFlags::new(true, false),
            },
        ));

        assert!(!state.joined.even);
        assert_eq!(state.ready, SlotFlags::new(true, false));
        assert!(!state.started);
        assert_eq!(state.phase(), Phase::WaitingForOpponent);
    }

    #[test]
    fn test_player_left_the_room() {
        let mut state = started_game();
        state.apply(&event(Some(Slot::Even), EventKind::PlayerLeftTheRoom));

        assert!(!state.joined.even);
        assert!(!state.ready.even);
        assert!(state.ready.odd);
        assert_eq!(state.notification, "Player EVEN left the room");
    }

    #[test]
    fn test_reset_and_reset_board() {
        let mut state = started_game();
        state.apply(&event(None, EventKind::StateSync { index: 4, value: 2 }));
        state.apply(&event(
            None,
            EventKind::GameOver {
                winner: Outcome::Draw,
                ready: SlotFlags::default(),
            },
        ));

        state.apply(&event(None, EventKind::Reset));
        assert!(state.winner.is_none());
        assert!(!state.started);
        assert_eq!(state.phase(), Phase::ReadyPhase);
        assert!(state.notification.contains("ready up"));
        assert_eq!(state.board.get(4), Some(2));

        state.apply(&event(
            None,
            EventKind::ResetBoard {
                board: Board::empty(),
            },
        ));
        assert!(state.board.is_empty());
    }

    #[test]
    fn test_missing_sender_is_noop() {
        let mut state = joined_as_odd();
        let before = state.clone();
        state.apply(&event(None, EventKind::PlayerJoined));
        state.apply(&event(None, EventKind::PlayerLeftTheRoom));
        assert_eq!(state, before);
    }

    #[test]
    fn test_phase_follows_flags() {
        let mut state = SessionState::new();
        assert_eq!(state.phase(), Phase::Unjoined);

        for (joined, started, winner, expected) in [
            (SlotFlags::new(false, false), false, None, Phase::Unjoined),
            (SlotFlags::new(true, false), false, None, Phase::WaitingForOpponent),
            (SlotFlags::new(false, true), false, None, Phase::WaitingForOpponent),
            (SlotFlags::both(true), false, None, Phase::ReadyPhase),
            (SlotFlags::both(true), true, None, Phase::InProgress),
            (SlotFlags::both(true), false, Some(Outcome::Even), Phase::GameOver),
        ] {
            state.joined = joined;
            state.started = started;
            state.winner = winner;
            assert_eq!(state.phase(), expected);
        }
    }
}
