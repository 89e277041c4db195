//! 入站帧解析
//!
//! 文本帧 -> 信封 -> 类型化事件。任何不合法的帧都返回错误，
//! 由调用方决定是否记录，绝不 panic。

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::constants::TOTAL_CELLS;
use crate::error::{ProtocolError, Result};
use crate::message::{Board, EventKind, InboundEnvelope, Outcome, SessionEvent, SlotFlags};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinedPayload {
    joined_status: SlotFlags,
    readied_status: SlotFlags,
    board: Board,
    #[serde(default)]
    winner: Option<Outcome>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadiedPayload {
    readied_status: SlotFlags,
}

#[derive(Deserialize)]
struct BoardPayload {
    board: Board,
}

#[derive(Deserialize, Default)]
struct MessagePayload {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct StateSyncPayload {
    index: usize,
    value: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameOverPayload {
    winner: Outcome,
    readied_status: SlotFlags,
}

/// 解析一帧，失败返回 None
pub fn parse(raw: &str) -> Option<SessionEvent> {
    match decode(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("Dropping malformed frame: {}", e);
            None
        }
    }
}

/// 解析一帧并返回具体错误
pub fn decode(raw: &str) -> Result<SessionEvent> {
    let envelope: InboundEnvelope = serde_json::from_str(raw)?;
    decode_envelope(envelope)
}

/// 将信封解释为类型化事件
pub fn decode_envelope(envelope: InboundEnvelope) -> Result<SessionEvent> {
    let InboundEnvelope {
        event,
        sender,
        payload,
    } = envelope;

    let kind = match event.as_str() {
        "JOINED" => {
            let p: JoinedPayload = payload_of(payload)?;
            EventKind::Joined {
                joined: p.joined_status,
                ready: p.readied_status,
                board: p.board,
                winner: p.winner,
            }
        }
        "READIED" => {
            let p: ReadiedPayload = payload_of(payload)?;
            EventKind::Readied {
                ready: p.readied_status,
            }
        }
        "START" => {
            let p: BoardPayload = payload_of(payload)?;
            EventKind::Start { board: p.board }
        }
        "FULL" => {
            let p: MessagePayload = optional_payload_of(payload)?;
            EventKind::Full { message: p.message }
        }
        "ERROR" => {
            let p: MessagePayload = optional_payload_of(payload)?;
            EventKind::Error { message: p.message }
        }
        "STATE_SYNC" => {
            let p: StateSyncPayload = payload_of(payload)?;
            if p.index >= TOTAL_CELLS {
                return Err(ProtocolError::CellOutOfRange {
                    index: p.index,
                    cells: TOTAL_CELLS,
                });
            }
            EventKind::StateSync {
                index: p.index,
                value: p.value,
            }
        }
        "PLAYER_JOINED" => EventKind::PlayerJoined,
        "PLAYER_READIED" => EventKind::PlayerReadied,
        "PLAYER_LEFT_THE_GAME" => {
            let p: ReadiedPayload = payload_of(payload)?;
            EventKind::PlayerLeftTheGame {
                ready: p.readied_status,
            }
        }
        "PLAYER_LEFT_THE_ROOM" => EventKind::PlayerLeftTheRoom,
        "GAMEOVER" => {
            let p: GameOverPayload = payload_of(payload)?;
            EventKind::GameOver {
                winner: p.winner,
                ready: p.readied_status,
            }
        }
        "RESET" => EventKind::Reset,
        "RESET_BOARD" => {
            let p: BoardPayload = payload_of(payload)?;
            EventKind::ResetBoard { board: p.board }
        }
        other => return Err(ProtocolError::UnknownEvent(other.to_string())),
    };

    if sender.is_none() && requires_sender(&kind) {
        return Err(ProtocolError::MissingSender { event: kind.name() });
    }

    Ok(SessionEvent::new(sender, kind))
}

/// 这些事件作用于发送方座位，缺少发送方时无法应用
fn requires_sender(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Joined { .. }
            | EventKind::PlayerJoined
            | EventKind::PlayerReadied
            | EventKind::PlayerLeftTheGame { .. }
            | EventKind::PlayerLeftTheRoom
    )
}

fn payload_of<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}

fn optional_payload_of<T: DeserializeOwned + Default>(payload: serde_json::Value) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    payload_of(payload)
}
