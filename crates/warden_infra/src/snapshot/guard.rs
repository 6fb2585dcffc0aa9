//! Runtime-guard snapshot wire format: a flat JSON object.
//!
//! Flags are written as `0`/`1` except `paused`, which is a JSON bool; both
//! forms are accepted on read. Only fields present in the snapshot are written.

use serde_json::{Map, Value};
use tracing::warn;
use warden_core::risk::{BreachReason, RuntimeGuardSnapshot};

use super::{Decoded, FieldIssue, SnapshotError, to_canonical_json};

pub fn encode_guard_snapshot(snapshot: &RuntimeGuardSnapshot) -> String {
    let mut root = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            root.insert(key.to_string(), value);
        }
    };
    put("paused", snapshot.paused.map(Value::from));
    put("paused_effective", snapshot.paused_effective.map(flag));
    put("last_reason_bits", snapshot.last_reason_bits.map(Value::from));
    put("last_change_ts_ms", snapshot.last_change_ts_ms.map(Value::from));
    put("hysteresis_bad", snapshot.hysteresis_bad.map(Value::from));
    put("hysteresis_good", snapshot.hysteresis_good.map(Value::from));
    put("consec_bad", snapshot.consec_bad.map(Value::from));
    put("consec_good", snapshot.consec_good.map(Value::from));
    put("pauses_total", snapshot.pauses_total.map(Value::from));
    put("dry_run", snapshot.dry_run.map(flag));
    put("manual_override_pause", snapshot.manual_override_pause.map(flag));
    to_canonical_json(&Value::Object(root))
}

pub fn decode_guard_snapshot(raw: &str) -> Result<Decoded<RuntimeGuardSnapshot>, SnapshotError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(root) = value else {
        return Err(SnapshotError::NotAnObject);
    };
    let mut issues = Vec::new();
    let mut reader = FieldReader {
        root: &root,
        issues: &mut issues,
    };

    let last_change_ts_ms = match reader.uint("last_change_ts_ms") {
        Some(ms) => Some(ms),
        // Older snapshots carry fractional unix seconds.
        None => reader
            .seconds("last_change_ts")
            .map(|sec| (sec * 1_000.0) as u64),
    };
    let snapshot = RuntimeGuardSnapshot {
        paused: reader.flag("paused"),
        paused_effective: reader.flag("paused_effective"),
        last_reason_bits: reader
            .uint("last_reason_bits")
            .map(|bits| BreachReason::from_bits_truncate(bits).bits()),
        last_change_ts_ms,
        hysteresis_bad: reader.uint("hysteresis_bad").map(saturate_u32),
        hysteresis_good: reader.uint("hysteresis_good").map(saturate_u32),
        consec_bad: reader.uint("consec_bad").map(saturate_u32),
        consec_good: reader.uint("consec_good").map(saturate_u32),
        pauses_total: reader.uint("pauses_total"),
        dry_run: reader.flag("dry_run"),
        manual_override_pause: reader.flag("manual_override_pause"),
    };
    for issue in &issues {
        warn!(field = %issue.field, reason = %issue.reason, "guard snapshot field skipped");
    }
    Ok(Decoded {
        value: snapshot,
        issues,
    })
}

fn flag(value: bool) -> Value {
    Value::from(u8::from(value))
}

fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

struct FieldReader<'a> {
    root: &'a Map<String, Value>,
    issues: &'a mut Vec<FieldIssue>,
}

impl FieldReader<'_> {
    fn flag(&mut self, field: &str) -> Option<bool> {
        let value = self.root.get(field)?;
        if let Some(b) = value.as_bool() {
            return Some(b);
        }
        match value.as_f64() {
            Some(n) => Some(n != 0.0),
            None => {
                self.issues.push(FieldIssue::new(field, "expected a bool or 0/1"));
                None
            }
        }
    }

    fn uint(&mut self, field: &str) -> Option<u64> {
        let value = self.root.get(field)?;
        if let Some(n) = value.as_u64() {
            return Some(n);
        }
        // Integral floats are accepted.
        match value.as_f64() {
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => Some(n as u64),
            _ => {
                self.issues.push(FieldIssue::new(field, "expected a non-negative integer"));
                None
            }
        }
    }

    fn seconds(&mut self, field: &str) -> Option<f64> {
        let value = self.root.get(field)?;
        match value.as_f64() {
            Some(sec) if sec >= 0.0 => Some(sec),
            _ => {
                self.issues.push(FieldIssue::new(field, "expected non-negative seconds"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_present_fields_are_written() {
        // GIVEN: a snapshot with two fields
        let snapshot = RuntimeGuardSnapshot {
            paused: Some(true),
            dry_run: Some(false),
            ..RuntimeGuardSnapshot::default()
        };

        // WHEN / THEN: only those keys appear, flags as 0/1
        assert_eq!(encode_guard_snapshot(&snapshot), r#"{"dry_run":0,"paused":true}"#);
    }

    #[test]
    fn test_legacy_seconds_timestamp_is_converted() {
        let decoded =
            decode_guard_snapshot(r#"{"last_change_ts": 12.5, "paused": 1}"#).expect("decodes");
        assert!(decoded.is_clean());
        assert_eq!(decoded.value.last_change_ts_ms, Some(12_500));
        assert_eq!(decoded.value.paused, Some(true));
    }

    #[test]
    fn test_bad_field_is_reported_and_others_kept() {
        let decoded = decode_guard_snapshot(r#"{"consec_bad": "two", "consec_good": 4}"#)
            .expect("decodes");
        assert_eq!(decoded.issues.len(), 1);
        assert_eq!(decoded.issues[0].field, "consec_bad");
        assert_eq!(decoded.value.consec_bad, None);
        assert_eq!(decoded.value.consec_good, Some(4));
    }
}
