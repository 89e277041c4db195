//! 收到消息的历史记录

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use protocol::SessionEvent;

/// 有界历史，超出容量时淘汰最旧的记录。容量为 0 表示不限
#[derive(Debug, Clone)]
pub struct History<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        if self.capacity > 0 {
            while self.items.len() > self.capacity {
                self.items.pop_front();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// 收件箱：原始帧和解析后事件的历史
#[derive(Debug, Clone)]
pub struct Inbox {
    raw: History<String>,
    parsed: History<SessionEvent>,
    last_raw: Option<String>,
    last_parsed: Option<SessionEvent>,
    last_received_at: Option<DateTime<Utc>>,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            raw: History::new(capacity),
            parsed: History::new(capacity),
            last_raw: None,
            last_parsed: None,
            last_received_at: None,
        }
    }

    /// 记录一帧。无法解析的帧只进入原始历史
    pub fn record(&mut self, raw: &str, parsed: Option<&SessionEvent>) {
        self.raw.push(raw.to_string());
        self.last_raw = Some(raw.to_string());
        self.last_received_at = Some(Utc::now());

        if let Some(event) = parsed {
            self.parsed.push(event.clone());
            self.last_parsed = Some(event.clone());
        }
    }

    pub fn raw_history(&self) -> &History<String> {
        &self.raw
    }

    pub fn parsed_history(&self) -> &History<SessionEvent> {
        &self.parsed
    }

    pub fn last_raw(&self) -> Option<&str> {
        self.last_raw.as_deref()
    }

    pub fn last_parsed(&self) -> Option<&SessionEvent> {
        self.last_parsed.as_ref()
    }

    pub fn last_received_at(&self) -> Option<DateTime<Utc>> {
        self.last_received_at
    }

    /// 清空所有记录
    pub fn clear(&mut self) {
        self.raw.clear();
        self.parsed.clear();
        self.last_raw = None;
        self.last_parsed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::EventKind;

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = History::new(3);
        for frame in ["A", "B", "C", "D"] {
            history.push(frame.to_string());
        }
        let items: Vec<_> = history.iter().cloned().collect();
        assert_eq!(items, vec!["B", "C", "D"]);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let mut history = History::new(0);
        for i in 0..100 {
            history.push(i);
        }
        assert_eq!(history.len(), 100);
    }

    #[test]
    fn test_unparsable_frame_only_in_raw_history() {
        let mut inbox = Inbox::new(10);
        let reset = SessionEvent::new(None, EventKind::Reset);

        inbox.record("{\"event\":\"RESET\"}", Some(&reset));
        inbox.record("PONG", None);

        assert_eq!(inbox.raw_history().len(), 2);
        assert_eq!(inbox.parsed_history().len(), 1);
        assert_eq!(inbox.last_raw(), Some("PONG"));
        assert_eq!(inbox.last_parsed(), Some(&reset));
        assert!(inbox.last_received_at().is_some());

        inbox.clear();
        assert!(inbox.raw_history().is_empty());
        assert!(inbox.last_parsed().is_none());
    }
}
