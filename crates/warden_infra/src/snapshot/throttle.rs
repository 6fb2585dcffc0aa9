//! Throttle snapshot wire format.
//!
//! Version 2: `{"version":2,"window_sec":N,"symbols":{"SYM":{"create":{"base_ts":S,"idx":I,"ring":[..]},..}}}`.
//! Version 1: `{"version":1,"window_since":RFC3339,"events_total":N,"backoff_ms_max":N,"last_event_ts":RFC3339}`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use tracing::warn;
use warden_core::throttle::{
    LegacyThrottleSnapshot, OpKind, RingWindowState, StructuredThrottleSnapshot,
    THROTTLE_SNAPSHOT_LEGACY_VERSION, THROTTLE_SNAPSHOT_STRUCTURED_VERSION, ThrottleSnapshot,
};

use super::{Decoded, FieldIssue, SnapshotError, to_canonical_json};

pub fn encode_throttle_snapshot(snapshot: &ThrottleSnapshot) -> String {
    let value = match snapshot {
        ThrottleSnapshot::Legacy(legacy) => json!({
            "version": THROTTLE_SNAPSHOT_LEGACY_VERSION,
            "window_since": ms_to_rfc3339(legacy.window_since_ms),
            "events_total": legacy.events_total,
            "backoff_ms_max": legacy.backoff_ms_max,
            "last_event_ts": ms_to_rfc3339(legacy.last_event_ms),
        }),
        ThrottleSnapshot::Structured(structured) => {
            let mut symbols = Map::new();
            for (symbol, kinds) in &structured.symbols {
                let mut windows = Map::new();
                for (kind, state) in kinds {
                    windows.insert(
                        kind.as_str().to_string(),
                        json!({
                            "base_ts": state.base_ts,
                            "idx": state.head,
                            "ring": state.buckets,
                        }),
                    );
                }
                symbols.insert(symbol.clone(), Value::Object(windows));
            }
            json!({
                "version": THROTTLE_SNAPSHOT_STRUCTURED_VERSION,
                "window_sec": structured.window_sec,
                "symbols": symbols,
            })
        }
    };
    to_canonical_json(&value)
}

/// Decode either version. A missing `version` means 1.
pub fn decode_throttle_snapshot(raw: &str) -> Result<Decoded<ThrottleSnapshot>, SnapshotError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(root) = value else {
        return Err(SnapshotError::NotAnObject);
    };
    let version = match root.get("version") {
        None => u64::from(THROTTLE_SNAPSHOT_LEGACY_VERSION),
        Some(v) => v.as_u64().ok_or(SnapshotError::UnsupportedVersion(0))?,
    };
    let mut issues = Vec::new();
    let snapshot = if version == u64::from(THROTTLE_SNAPSHOT_LEGACY_VERSION) {
        ThrottleSnapshot::Legacy(decode_legacy(&root, &mut issues))
    } else if version == u64::from(THROTTLE_SNAPSHOT_STRUCTURED_VERSION) {
        ThrottleSnapshot::Structured(decode_structured(&root, &mut issues))
    } else {
        return Err(SnapshotError::UnsupportedVersion(version));
    };
    for issue in &issues {
        warn!(field = %issue.field, reason = %issue.reason, "throttle snapshot field defaulted");
    }
    Ok(Decoded {
        value: snapshot,
        issues,
    })
}

fn decode_legacy(root: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> LegacyThrottleSnapshot {
    LegacyThrottleSnapshot {
        window_since_ms: timestamp_field(root, "window_since", issues),
        events_total: u64_field(root, "events_total", issues),
        backoff_ms_max: u64_field(root, "backoff_ms_max", issues),
        last_event_ms: timestamp_field(root, "last_event_ts", issues),
    }
}

fn decode_structured(
    root: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> StructuredThrottleSnapshot {
    let window_sec = u64_field(root, "window_sec", issues);
    let mut symbols = BTreeMap::new();
    match root.get("symbols") {
        None => {}
        Some(Value::Object(entries)) => {
            for (symbol, kinds) in entries {
                let Value::Object(kinds) = kinds else {
                    issues.push(FieldIssue::new(
                        format!("symbols.{symbol}"),
                        "expected an object",
                    ));
                    continue;
                };
                let mut windows = BTreeMap::new();
                for (name, state) in kinds {
                    let field = format!("symbols.{symbol}.{name}");
                    let Some(kind) = OpKind::parse(name) else {
                        issues.push(FieldIssue::new(field, "unknown operation kind"));
                        continue;
                    };
                    match decode_window(state) {
                        Ok(state) => {
                            windows.insert(kind, state);
                        }
                        Err(reason) => issues.push(FieldIssue::new(field, reason)),
                    }
                }
                symbols.insert(symbol.clone(), windows);
            }
        }
        Some(_) => issues.push(FieldIssue::new("symbols", "expected an object")),
    }
    StructuredThrottleSnapshot {
        window_sec,
        symbols,
    }
}

fn decode_window(value: &Value) -> Result<RingWindowState, &'static str> {
    let Value::Object(fields) = value else {
        return Err("expected an object");
    };
    let base_ts = fields
        .get("base_ts")
        .and_then(Value::as_i64)
        .ok_or("base_ts must be an integer")?;
    let head = fields
        .get("idx")
        .and_then(Value::as_u64)
        .ok_or("idx must be a non-negative integer")? as usize;
    let buckets = fields
        .get("ring")
        .and_then(Value::as_array)
        .ok_or("ring must be an array")?
        .iter()
        .map(Value::as_u64)
        .collect::<Option<Vec<u64>>>()
        .ok_or("ring must hold non-negative integers")?;
    Ok(RingWindowState {
        base_ts,
        head,
        buckets,
    })
}

fn u64_field(root: &Map<String, Value>, field: &str, issues: &mut Vec<FieldIssue>) -> u64 {
    match root.get(field) {
        None => 0,
        Some(v) => v.as_u64().unwrap_or_else(|| {
            issues.push(FieldIssue::new(field, "expected a non-negative integer"));
            0
        }),
    }
}

fn timestamp_field(root: &Map<String, Value>, field: &str, issues: &mut Vec<FieldIssue>) -> u64 {
    let Some(value) = root.get(field) else {
        return 0;
    };
    match value.as_str().map(DateTime::parse_from_rfc3339) {
        Some(Ok(ts)) => u64::try_from(ts.timestamp_millis()).unwrap_or(0),
        _ => {
            issues.push(FieldIssue::new(field, "expected an RFC 3339 timestamp"));
            0
        }
    }
}

fn ms_to_rfc3339(ms: u64) -> String {
    let ts = i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default();
    ts.to_rfc3339_opts(SecondsFormat::Millis, false)
}
