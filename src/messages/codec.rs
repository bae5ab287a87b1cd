//! # Wire format for channel values crossing a process boundary.
//!
//! Newline-delimited JSON messages over the worker's stdin/stdout. Each
//! [`Value`] maps onto a [`WireValue`] mirror; opaque payloads have no mirror
//! and fail with [`ChannelError::Encode`] — a different kind than a type
//! mismatch, because the value satisfies its key's declared kind and only the
//! boundary rejects it.
//!
//! ## Message flow
//! ```text
//! parent ──Init{routine, environment, request, common}──► child
//! parent ──Sync{request, common}──────────────────────►  child   (version poll)
//! parent ──Cancel───────────────────────────────────►    child   (cooperative stop)
//! child  ──Update{channel, key, entry}───────────────►   parent  (common writes)
//! child  ──Done{error}───────────────────────────────►   parent  (terminal, once)
//! ```
//!
//! Delivery is single-write correct, nothing more: a torn pipe surfaces as
//! [`ChannelError::Transport`] and the frame fails accordingly.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::messages::store::Store;
use crate::messages::value::{Value, ValueKind};

/// Serializable mirror of [`Value`], minus the opaque variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl WireValue {
    pub(crate) fn into_value(self) -> Value {
        match self {
            WireValue::Bool(v) => Value::Bool(v),
            WireValue::Int(v) => Value::Int(v),
            WireValue::Float(v) => Value::Float(v),
            WireValue::Str(v) => Value::Str(v),
            WireValue::Bytes(v) => Value::Bytes(v),
            WireValue::Json(v) => Value::Json(v),
        }
    }
}

/// Which IPC-capable channel an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum WireChannel {
    Environment,
    Request,
    Common,
}

/// One key's wire state: declared kind plus the value, if not consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireEntry {
    pub key: String,
    pub kind: ValueKind,
    pub value: Option<WireValue>,
}

/// A single child-side mutation reported upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireUpdate {
    pub channel: WireChannel,
    pub entry: WireEntry,
}

/// Parent → child messages.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum HostMessage {
    /// Bootstrap: routine to run plus full channel snapshots.
    Init {
        routine: String,
        qualname: String,
        parallel: bool,
        environment: Vec<WireEntry>,
        request: Vec<WireEntry>,
        common: Vec<WireEntry>,
    },
    /// Re-sync of the mutable channels after a version change.
    Sync { request: Vec<WireEntry>, common: Vec<WireEntry> },
    /// Cooperative stop request.
    Cancel,
}

/// Child → parent messages.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WorkerMessage {
    /// A `common` mutation made by the worker routine.
    Update(WireUpdate),
    /// Terminal report; sent exactly once before exit.
    Done { error: Option<String> },
}

/// Encodes one value for the wire.
pub(crate) fn encode_value(
    channel: &'static str,
    key: &str,
    value: &Value,
) -> Result<WireValue, ChannelError> {
    match value {
        Value::Bool(v) => Ok(WireValue::Bool(*v)),
        Value::Int(v) => Ok(WireValue::Int(*v)),
        Value::Float(v) => Ok(WireValue::Float(*v)),
        Value::Str(v) => Ok(WireValue::Str(v.clone())),
        Value::Bytes(v) => Ok(WireValue::Bytes(v.clone())),
        Value::Json(v) => Ok(WireValue::Json(v.clone())),
        Value::Opaque(_) => Err(ChannelError::Encode {
            channel,
            key: key.to_string(),
            reason: "opaque values have no wire representation".to_string(),
        }),
    }
}

/// Encodes a full store snapshot, failing on the first opaque value.
pub(crate) fn encode_store(store: &Store) -> Result<Vec<WireEntry>, ChannelError> {
    let mut entries = Vec::new();
    for (key, kind, value) in store.snapshot() {
        let value = match value {
            Some(v) => Some(encode_value(store.channel(), &key, &v)?),
            None => None,
        };
        entries.push(WireEntry { key, kind, value });
    }
    Ok(entries)
}

/// Installs wire entries into a store, overwriting existing state.
pub(crate) fn merge_entries(store: &Store, entries: Vec<WireEntry>) {
    store.merge(
        entries
            .into_iter()
            .map(|e| (e.key, e.kind, e.value.map(WireValue::into_value)))
            .collect(),
    );
}

/// Serializes a message as one JSON line.
pub(crate) fn to_line<T: Serialize>(msg: &T) -> Result<String, ChannelError> {
    let mut line = serde_json::to_string(msg).map_err(|e| ChannelError::Transport {
        reason: format!("encode: {e}"),
    })?;
    line.push('\n');
    Ok(line)
}

/// Parses one JSON line into a message.
pub(crate) fn from_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ChannelError> {
    serde_json::from_str(line.trim_end()).map_err(|e| ChannelError::Transport {
        reason: format!("decode: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::value::OpaqueValue;

    #[test]
    fn opaque_fails_encode_not_type_mismatch() {
        let err = encode_value("common", "handle", &Value::Opaque(OpaqueValue::new(5u8)))
            .unwrap_err();
        assert_eq!(err.as_label(), "channel_encode");
    }

    #[test]
    fn store_round_trips_through_wire_entries() {
        let src = Store::new("common");
        src.define("count", Value::Int(3)).unwrap();
        src.define("label", Value::Str("a".into())).unwrap();
        src.consume("label", ValueKind::Str).unwrap();

        let entries = encode_store(&src).unwrap();
        let dst = Store::new("common");
        merge_entries(&dst, entries);

        assert!(matches!(dst.get("count", ValueKind::Int).unwrap(), Value::Int(3)));
        assert_eq!(dst.get("label", ValueKind::Str).unwrap_err().as_label(), "channel_value_consumed");
    }

    #[test]
    fn messages_survive_a_line_round_trip() {
        let msg = WorkerMessage::Done { error: Some("boom".into()) };
        let line = to_line(&msg).unwrap();
        let back: WorkerMessage = from_line(&line).unwrap();
        match back {
            WorkerMessage::Done { error } => assert_eq!(error.as_deref(), Some("boom")),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
