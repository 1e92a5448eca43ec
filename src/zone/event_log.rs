//! Per-zone event log (SPEC_FULL.md §4.9): a bounded, append-only FIFO
//! queried by clients to reconstruct a combat feed or a chat window.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::chrono_like::now_millis;
use crate::ids::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Combat,
    Kill,
    LevelUp,
    Death,
    Chat,
    System,
    Gather,
    Transition,
    GateSurge,
    GateFaded,
    DungeonCleared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub tick: u64,
    pub timestamp_ms: i64,
    pub message: String,
    pub actor_id: Option<EntityId>,
    pub target_id: Option<EntityId>,
    pub data: serde_json::Value,
}

/// A bounded, append-only FIFO. Oldest events are dropped once `capacity` is
/// exceeded; nothing already appended is ever mutated, matching the
/// "events never mutate" invariant.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: VecDeque<Event>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(
        &mut self,
        event_type: EventType,
        tick: u64,
        message: impl Into<String>,
        actor_id: Option<EntityId>,
        target_id: Option<EntityId>,
        data: serde_json::Value,
    ) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            event_type,
            tick,
            timestamp_ms: now_millis(),
            message: message.into(),
            actor_id,
            target_id,
            data,
        });
    }

    /// Returns up to `limit` events with `timestamp_ms > since`, oldest
    /// first, matching their storage order (append-only means storage order
    /// already is chronological).
    pub fn query(&self, since: Option<i64>, limit: Option<usize>) -> Vec<Event> {
        let since = since.unwrap_or(0);
        let iter = self.events.iter().filter(|e| e.timestamp_ms > since).cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_once_over_capacity() {
        let mut log = EventLog::new(2);
        log.push(EventType::System, 0, "a", None, None, serde_json::json!({}));
        log.push(EventType::System, 1, "b", None, None, serde_json::json!({}));
        log.push(EventType::System, 2, "c", None, None, serde_json::json!({}));
        let all = log.query(None, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "b");
        assert_eq!(all[1].message, "c");
    }

    #[test]
    fn since_filter_excludes_earlier_events() {
        let mut log = EventLog::new(10);
        log.push(EventType::System, 0, "a", None, None, serde_json::json!({}));
        let cutoff = log.events.back().unwrap().timestamp_ms;
        log.push(EventType::System, 1, "b", None, None, serde_json::json!({}));
        let recent = log.query(Some(cutoff), None);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "b");
    }
}
