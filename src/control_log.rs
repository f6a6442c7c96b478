//! The JSON-Lines control-log record shape. A pure value type: turning a
//! stream of [`ControlLogEntry`] into actual lines on disk is the
//! responsibility of whoever wires a camera's handlers together, not this
//! crate.

use serde::Serialize;

use crate::decode::TriggerEvent;

/// One control-log line: `{t, type, payload}`, with `t` a monotonically
/// increasing wall-clock timestamp assigned by the caller at record time.
#[derive(Debug, Clone, Serialize)]
pub struct ControlLogEntry {
    pub t: u64,
    #[serde(flatten)]
    pub kind: ControlLogEntryKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ControlLogEntryKind {
    Trigger(TriggerPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerPayload {
    pub t: u64,
    pub system_timestamp: u64,
    pub id: u8,
    pub rising: bool,
}

impl ControlLogEntry {
    /// Builds the control-log record for a trigger event. `t` is the wall-clock
    /// timestamp of the log line itself, independent of the trigger's own
    /// sensor timestamp carried in the payload.
    pub fn trigger(t: u64, trigger: &TriggerEvent) -> Self {
        ControlLogEntry {
            t,
            kind: ControlLogEntryKind::Trigger(TriggerPayload {
                t: trigger.t,
                system_timestamp: trigger.system_timestamp,
                id: trigger.id,
                rising: trigger.rising,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_entry_serializes_to_the_documented_shape() {
        let entry = ControlLogEntry::trigger(100, &TriggerEvent { t: 42, system_timestamp: 99, id: 3, rising: true });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "t": 100,
                "type": "trigger",
                "payload": { "t": 42, "system_timestamp": 99, "id": 3, "rising": true }
            })
        );
    }
}
