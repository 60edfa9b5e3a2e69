//! Notification events.
//!
//! The core never owns a queue or broadcast loop: it is handed an
//! `EventSink` and calls `emit` after a successful commit, never before.
//! Emission is fire-and-forget — a sink that drops, logs or fails has no
//! effect on the transaction that produced the event.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Event kind for bankroll changes (wins, voids, losses, bonuses).
pub const BANKROLL_UPDATE: &str = "bankroll_update";

/// Destination for post-commit notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, kind: &str, payload: Value);
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A bankroll change notification.
///
/// Serialised as `{user_id, new_bankroll, reason, match_id}` to stay
/// wire-compatible with existing subscribers.
#[derive(Debug, Clone)]
pub struct BankrollEvent {
    pub account_id: i64,
    pub new_bankroll: Decimal,
    pub reason: String,
    pub market_id: Option<i64>,
}

impl BankrollEvent {
    pub fn payload(&self) -> Value {
        json!({
            "user_id": self.account_id,
            "new_bankroll": self.new_bankroll,
            "reason": self.reason,
            "match_id": self.market_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _kind: &str, _payload: Value) {}
}

/// Logs every event with a correlation id. The default sink for the
/// binary until a real broadcaster is wired up.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, kind: &str, payload: Value) {
        info!(event_id = %Uuid::new_v4(), kind, %payload, "Event emitted");
    }
}

/// Records events in memory for assertions in tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, kind: &str, payload: Value) {
        self.events.lock().unwrap().push((kind.to_string(), payload));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bankroll_event_payload_shape() {
        let event = BankrollEvent {
            account_id: 7,
            new_bankroll: dec!(1090.00),
            reason: "wager_win".to_string(),
            market_id: Some(3),
        };
        let payload = event.payload();
        assert_eq!(payload["user_id"], 7);
        assert_eq!(payload["reason"], "wager_win");
        assert_eq!(payload["match_id"], 3);
    }

    #[test]
    fn test_bankroll_event_without_market() {
        let event = BankrollEvent {
            account_id: 1,
            new_bankroll: dec!(2000.00),
            reason: "round_bonus".to_string(),
            market_id: None,
        };
        assert!(event.payload()["match_id"].is_null());
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(BANKROLL_UPDATE, json!({"user_id": 1}));
        sink.emit(BANKROLL_UPDATE, json!({"user_id": 2}));

        let recorded = sink.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].1["user_id"], 1);
        assert_eq!(recorded[1].1["user_id"], 2);
    }

    #[test]
    fn test_null_sink_swallows() {
        NullSink.emit(BANKROLL_UPDATE, json!({}));
    }
}
