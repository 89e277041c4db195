//! 消息类型定义

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::constants::{EMPTY_CELL, TOTAL_CELLS};
use crate::error::{ProtocolError, Result};

/// 房间 ID（6 位数字字符串，由外部校验）
pub type RoomId = String;

/// 玩家座位
///
/// 房间内只有两个固定座位，服务端在 JOINED 时分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Odd,
    Even,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Odd => write!(f, "ODD"),
            Slot::Even => write!(f, "EVEN"),
        }
    }
}

/// 两个座位各自的布尔状态（已加入 / 已准备）
///
/// 结构体字段固定，保证永远恰好包含两个座位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFlags {
    pub odd: bool,
    pub even: bool,
}

impl SlotFlags {
    pub const fn new(odd: bool, even: bool) -> Self {
        Self { odd, even }
    }

    /// 两个座位取相同值
    pub const fn both(value: bool) -> Self {
        Self::new(value, value)
    }

    pub fn set(&mut self, slot: Slot, value: bool) {
        match slot {
            Slot::Odd => self.odd = value,
            Slot::Even => self.even = value,
        }
    }

    /// 为 true 的座位数量
    pub fn count(&self) -> usize {
        usize::from(self.odd) + usize::from(self.even)
    }
}

impl Index<Slot> for SlotFlags {
    type Output = bool;

    fn index(&self, slot: Slot) -> &bool {
        match slot {
            Slot::Odd => &self.odd,
            Slot::Even => &self.even,
        }
    }
}

/// 对局结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// 奇方胜
    Odd,
    /// 偶方胜
    Even,
    /// 和棋
    Draw,
}

impl Outcome {
    /// 获胜座位（和棋返回 None）
    pub fn winner_slot(self) -> Option<Slot> {
        match self {
            Outcome::Odd => Some(Slot::Odd),
            Outcome::Even => Some(Slot::Even),
            Outcome::Draw => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.winner_slot() {
            Some(slot) => write!(f, "{} wins", slot),
            None => write!(f, "draw"),
        }
    }
}

/// 棋盘
///
/// 长度固定为 TOTAL_CELLS，0 表示空格，其它编码对客户端不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct Board(Vec<i32>);

impl Board {
    /// 空棋盘
    pub fn empty() -> Self {
        Self(vec![EMPTY_CELL; TOTAL_CELLS])
    }

    /// 从格子序列构造，长度必须等于 TOTAL_CELLS
    pub fn from_cells(cells: Vec<i32>) -> Result<Self> {
        if cells.len() != TOTAL_CELLS {
            return Err(ProtocolError::BoardLength {
                expected: TOTAL_CELLS,
                actual: cells.len(),
            });
        }
        Ok(Self(cells))
    }

    pub fn cells(&self) -> &[i32] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.0.get(index).copied()
    }

    /// 写入格子，返回是否发生变化
    pub fn set(&mut self, index: usize, value: i32) -> Result<bool> {
        let cells = self.0.len();
        let cell = self
            .0
            .get_mut(index)
            .ok_or(ProtocolError::CellOutOfRange { index, cells })?;
        if *cell == value {
            return Ok(false);
        }
        *cell = value;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&c| c == EMPTY_CELL)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Vec<i32>> for Board {
    type Error = ProtocolError;

    fn try_from(cells: Vec<i32>) -> Result<Self> {
        Self::from_cells(cells)
    }
}

impl From<Board> for Vec<i32> {
    fn from(board: Board) -> Self {
        board.0
    }
}

/// 服务端推送的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// 加入成功（发送方即本地座位）
    Joined {
        joined: SlotFlags,
        ready: SlotFlags,
        board: Board,
        winner: Option<Outcome>,
    },
    /// 准备状态整体更新
    Readied { ready: SlotFlags },
    /// 游戏开始
    Start { board: Board },
    /// 房间已满
    Full { message: Option<String> },
    /// 服务端错误
    Error { message: Option<String> },
    /// 单个格子同步
    StateSync { index: usize, value: i32 },
    /// 对手加入
    PlayerJoined,
    /// 某方已准备
    PlayerReadied,
    /// 某方离开对局（仍在房间）
    PlayerLeftTheGame { ready: SlotFlags },
    /// 某方离开房间
    PlayerLeftTheRoom,
    /// 游戏结束
    GameOver { winner: Outcome, ready: SlotFlags },
    /// 重新开始
    Reset,
    /// 棋盘整体重置
    ResetBoard { board: Board },
}

impl EventKind {
    /// 线上事件名
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Joined { .. } => "JOINED",
            EventKind::Readied { .. } => "READIED",
            EventKind::Start { .. } => "START",
            EventKind::Full { .. } => "FULL",
            EventKind::Error { .. } => "ERROR",
            EventKind::StateSync { .. } => "STATE_SYNC",
            EventKind::PlayerJoined => "PLAYER_JOINED",
            EventKind::PlayerReadied => "PLAYER_READIED",
            EventKind::PlayerLeftTheGame { .. } => "PLAYER_LEFT_THE_GAME",
            EventKind::PlayerLeftTheRoom => "PLAYER_LEFT_THE_ROOM",
            EventKind::GameOver { .. } => "GAMEOVER",
            EventKind::Reset => "RESET",
            EventKind::ResetBoard { .. } => "RESET_BOARD",
        }
    }
}

/// 解码后的会话事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// 发送方座位（服务端广播时为空）
    pub sender: Option<Slot>,
    pub kind: EventKind,
}

impl SessionEvent {
    pub fn new(sender: Option<Slot>, kind: EventKind) -> Self {
        Self { sender, kind }
    }
}

/// 入站帧信封（未解释的原始形态）
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub sender: Option<Slot>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// 客户端命令种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Join,
    Ready,
    Move,
    Leave,
    Reset,
}

/// 客户端发送给服务端的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCommand {
    pub event: CommandKind,
    pub room_id: RoomId,
    pub sender: Option<Slot>,
    pub payload: serde_json::Value,
}

impl ClientCommand {
    /// 编码为文本帧
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
