//! 出站命令构造
//!
//! 只负责拼装 `{event, roomId, sender, payload}`，发送交给传输层。

use serde_json::json;

use crate::message::{ClientCommand, CommandKind, RoomId, Slot};

/// 命令构造器（绑定一个房间）
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    room_id: RoomId,
}

impl CommandBuilder {
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// 加入房间（座位由服务端分配，发送方为空）
    pub fn join(&self) -> ClientCommand {
        self.build(CommandKind::Join, None, json!({}))
    }

    /// 准备
    pub fn ready(&self, sender: Option<Slot>) -> ClientCommand {
        self.build(CommandKind::Ready, sender, json!({}))
    }

    /// 落子
    pub fn make_move(&self, sender: Option<Slot>, index: usize) -> ClientCommand {
        self.build(CommandKind::Move, sender, json!({ "index": index }))
    }

    /// 重新开始
    pub fn reset(&self, sender: Option<Slot>) -> ClientCommand {
        self.build(CommandKind::Reset, sender, json!({}))
    }

    /// 离开房间
    pub fn leave(&self, sender: Option<Slot>) -> ClientCommand {
        self.build(CommandKind::Leave, sender, json!({}))
    }

    fn build(&self, event: CommandKind, sender: Option<Slot>, payload: serde_json::Value) -> ClientCommand {
        ClientCommand {
            event,
            room_id: self.room_id.clone(),
            sender,
            payload,
        }
    }
}
