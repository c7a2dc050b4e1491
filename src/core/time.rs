//! Timestamp and event-id helpers shared by the audit log and CLI envelopes.

use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

pub const ENVELOPE_VERSION: &str = "1.0.0";

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Unix-epoch seconds with a `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_epoch_secs())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Wrap a command result in the JSON envelope printed by `--format json`.
///
/// Keys from `extra` are merged into the top level; envelope keys win on clash.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut out = serde_json::Map::new();
    if let JsonValue::Object(extra_obj) = extra {
        out.extend(extra_obj);
    }
    out.insert("envelope_version".into(), ENVELOPE_VERSION.into());
    out.insert("ts".into(), now_epoch_z().into());
    out.insert("event_id".into(), new_event_id().into());
    out.insert("cmd".into(), cmd.into());
    out.insert("status".into(), status.into());
    JsonValue::Object(out)
}
