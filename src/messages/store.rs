//! # Defined-once key/value store backing every channel.
//!
//! One [`Store`] per channel per frame tree (plus one `local` store per
//! frame). Keys are declared exactly once with a [`ValueKind`]; the key and
//! its kind outlive the value. Removing a value ("consuming" it) leaves the
//! key defined, and a later `set` restores it.
//!
//! ## Rules
//! - `define` fails on an existing key; every mutator requires a defined key.
//! - Kind checks happen before any write; a mismatched read/write never
//!   changes the slot.
//! - Null JSON payloads are rejected everywhere a value enters the store.
//! - Every public method takes the store lock for exactly one logical
//!   operation; [`Store::batch`] hands the lock to the caller for several.
//! - A version counter increments on every completed mutation; the IPC pump
//!   uses it to detect when a re-sync is due.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::error::ChannelError;
use crate::messages::batch::BatchGuard;
use crate::messages::value::{Value, ValueKind};

/// One key's storage: the declared kind plus the value, if not consumed.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) kind: ValueKind,
    pub(crate) value: Option<Value>,
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) slots: HashMap<String, Slot>,
    pub(crate) version: u64,
}

/// Thread-safe channel store.
#[derive(Debug)]
pub struct Store {
    channel: &'static str,
    inner: Mutex<Inner>,
}

impl Store {
    /// Creates an empty store for the named channel.
    pub fn new(channel: &'static str) -> Self {
        Self { channel, inner: Mutex::new(Inner::default()) }
    }

    /// Channel name this store backs (for error reporting).
    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Current mutation counter.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Declares `key` with the kind of `value` and installs the value.
    ///
    /// Fails with `KeyAlreadyDefined` if the key exists, `NullValue` for null
    /// payloads.
    pub fn define(&self, key: &str, value: Value) -> Result<(), ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(key) {
            return Err(ChannelError::KeyAlreadyDefined {
                channel: self.channel,
                key: key.to_string(),
            });
        }
        inner.slots.insert(key.to_string(), Slot { kind: value.kind(), value: Some(value) });
        inner.version += 1;
        Ok(())
    }

    /// Returns the value for `key`.
    ///
    /// Fails with `KeyNotFound`, `ValueConsumed`, or `TypeMismatch` when
    /// `kind` differs from the declared kind.
    pub fn get(&self, key: &str, kind: ValueKind) -> Result<Value, ChannelError> {
        let inner = self.inner.lock();
        let slot = self.slot(&inner, key)?;
        self.check_kind(key, slot.kind, kind)?;
        slot.value.clone().ok_or_else(|| self.consumed(key))
    }

    /// Returns the value for `key` regardless of its declared kind.
    ///
    /// Used by the string-coercion helpers, which accept any kind.
    pub fn get_any(&self, key: &str) -> Result<Value, ChannelError> {
        let inner = self.inner.lock();
        let slot = self.slot(&inner, key)?;
        slot.value.clone().ok_or_else(|| self.consumed(key))
    }

    /// Returns the value for `key`, or `default` when the key is missing or
    /// consumed. A kind mismatch on a present value is still an error.
    pub fn get_or(&self, key: &str, kind: ValueKind, default: Value) -> Result<Value, ChannelError> {
        let inner = self.inner.lock();
        match inner.slots.get(key) {
            None => Ok(default),
            Some(slot) => {
                self.check_kind(key, slot.kind, kind)?;
                Ok(slot.value.clone().unwrap_or(default))
            }
        }
    }

    /// Unconditionally installs `value`, re-filling a consumed slot if needed.
    pub fn set(&self, key: &str, value: Value) -> Result<(), ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != value.kind() {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        slot.value = Some(value);
        inner.version += 1;
        Ok(())
    }

    /// Installs `value` and returns the previous value.
    ///
    /// Unlike [`Store::set`], the slot must currently hold a value.
    pub fn swap(&self, key: &str, value: Value) -> Result<Value, ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != value.kind() {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        let prev = slot.value.replace(value).ok_or_else(|| ChannelError::ValueConsumed {
            channel,
            key: key.to_string(),
        })?;
        inner.version += 1;
        Ok(prev)
    }

    /// Transforms the current value with `f` and returns the new value.
    ///
    /// `f` must return a value of the declared kind.
    pub fn apply(
        &self,
        key: &str,
        kind: ValueKind,
        f: impl FnOnce(Value) -> Value,
    ) -> Result<Value, ChannelError> {
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != kind {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: kind,
            });
        }
        let current = slot.value.take().ok_or_else(|| ChannelError::ValueConsumed {
            channel,
            key: key.to_string(),
        })?;
        let next = f(current);
        if next.kind() != slot.kind || next.is_null() {
            let found = next.kind();
            // The old value is gone by contract; the slot stays consumed.
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found,
            });
        }
        slot.value = Some(next.clone());
        inner.version += 1;
        Ok(next)
    }

    /// Installs `value` only when the slot is currently consumed.
    ///
    /// Returns `true` when the value was installed.
    pub fn offer(&self, key: &str, value: Value) -> Result<bool, ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != value.kind() {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        if slot.value.is_some() {
            return Ok(false);
        }
        slot.value = Some(value);
        inner.version += 1;
        Ok(true)
    }

    /// Installs `value` only when the slot currently holds a value.
    ///
    /// The dual of [`Store::offer`]. Returns `true` when the value was
    /// installed.
    pub fn ensure(&self, key: &str, value: Value) -> Result<bool, ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != value.kind() {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        if slot.value.is_none() {
            return Ok(false);
        }
        slot.value = Some(value);
        inner.version += 1;
        Ok(true)
    }

    /// Removes and returns the value; the key stays defined ("consumed").
    pub fn consume(&self, key: &str, kind: ValueKind) -> Result<Value, ChannelError> {
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != kind {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: kind,
            });
        }
        let prev = slot.value.take().ok_or_else(|| ChannelError::ValueConsumed {
            channel,
            key: key.to_string(),
        })?;
        inner.version += 1;
        Ok(prev)
    }

    /// Removes the current value and installs a replacement in one step.
    ///
    /// Returns the removed value.
    pub fn consume_and(&self, key: &str, value: Value) -> Result<Value, ChannelError> {
        if value.is_null() {
            return Err(self.null(key));
        }
        let mut inner = self.inner.lock();
        let channel = self.channel;
        let slot = inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel,
            key: key.to_string(),
        })?;
        if slot.kind != value.kind() {
            return Err(ChannelError::TypeMismatch {
                channel,
                key: key.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        let prev = slot.value.replace(value).ok_or_else(|| ChannelError::ValueConsumed {
            channel,
            key: key.to_string(),
        })?;
        inner.version += 1;
        Ok(prev)
    }

    /// Takes the store lock for the guard's lifetime.
    ///
    /// Every other method on this store blocks until the guard drops; calling
    /// one from the holding thread deadlocks by design. Use only the guard's
    /// own accessors inside the scope.
    pub fn batch(&self) -> BatchGuard<'_> {
        BatchGuard::new(self.channel, self.inner.lock())
    }

    /// Current state of a single key, if defined.
    pub(crate) fn slot_state(&self, key: &str) -> Option<(ValueKind, Option<Value>)> {
        let inner = self.inner.lock();
        inner.slots.get(key).map(|s| (s.kind, s.value.clone()))
    }

    /// Full copy of the store for wire encoding and bootstrap.
    pub(crate) fn snapshot(&self) -> Vec<(String, ValueKind, Option<Value>)> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .map(|(k, slot)| (k.clone(), slot.kind, slot.value.clone()))
            .collect()
    }

    /// Installs slots wholesale, defining missing keys and overwriting
    /// existing values. IPC sync path only; bypasses the define-once rule
    /// because the authoritative store already enforced it.
    pub(crate) fn merge(&self, entries: Vec<(String, ValueKind, Option<Value>)>) {
        let mut inner = self.inner.lock();
        for (key, kind, value) in entries {
            inner.slots.insert(key, Slot { kind, value });
        }
        inner.version += 1;
    }

    fn slot<'a>(&self, inner: &'a MutexGuard<'_, Inner>, key: &str) -> Result<&'a Slot, ChannelError> {
        inner.slots.get(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel: self.channel,
            key: key.to_string(),
        })
    }

    fn check_kind(
        &self,
        key: &str,
        expected: ValueKind,
        found: ValueKind,
    ) -> Result<(), ChannelError> {
        if expected == found {
            Ok(())
        } else {
            Err(ChannelError::TypeMismatch {
                channel: self.channel,
                key: key.to_string(),
                expected,
                found,
            })
        }
    }

    fn consumed(&self, key: &str) -> ChannelError {
        ChannelError::ValueConsumed { channel: self.channel, key: key.to_string() }
    }

    fn null(&self, key: &str) -> ChannelError {
        ChannelError::NullValue { channel: self.channel, key: key.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::new("common")
    }

    #[test]
    fn define_twice_fails() {
        let s = store();
        s.define("limit", Value::Int(10)).unwrap();
        let err = s.define("limit", Value::Int(20)).unwrap_err();
        assert_eq!(err.as_label(), "channel_key_defined");
    }

    #[test]
    fn null_json_rejected() {
        let s = store();
        let err = s.define("x", Value::Json(serde_json::Value::Null)).unwrap_err();
        assert_eq!(err.as_label(), "channel_null_value");
    }

    #[test]
    fn get_checks_kind() {
        let s = store();
        s.define("limit", Value::Int(10)).unwrap();
        let err = s.get("limit", ValueKind::Str).unwrap_err();
        assert_eq!(err.as_label(), "channel_type_mismatch");
        assert!(matches!(s.get("limit", ValueKind::Int).unwrap(), Value::Int(10)));
    }

    #[test]
    fn consume_then_get_fails_then_set_restores() {
        let s = store();
        s.define("job", Value::Str("a".into())).unwrap();
        let taken = s.consume("job", ValueKind::Str).unwrap();
        assert!(matches!(taken, Value::Str(v) if v == "a"));

        let err = s.get("job", ValueKind::Str).unwrap_err();
        assert_eq!(err.as_label(), "channel_value_consumed");

        s.set("job", Value::Str("b".into())).unwrap();
        assert!(matches!(s.get("job", ValueKind::Str).unwrap(), Value::Str(v) if v == "b"));
    }

    #[test]
    fn double_consume_fails() {
        let s = store();
        s.define("job", Value::Int(1)).unwrap();
        s.consume("job", ValueKind::Int).unwrap();
        let err = s.consume("job", ValueKind::Int).unwrap_err();
        assert_eq!(err.as_label(), "channel_value_consumed");
    }

    #[test]
    fn swap_returns_previous_and_installs_new() {
        let s = store();
        s.define("count", Value::Int(1)).unwrap();
        let prev = s.swap("count", Value::Int(2)).unwrap();
        assert!(matches!(prev, Value::Int(1)));
        assert!(matches!(s.get("count", ValueKind::Int).unwrap(), Value::Int(2)));
    }

    #[test]
    fn offer_only_fills_consumed_slots() {
        let s = store();
        s.define("token", Value::Str("t1".into())).unwrap();
        assert!(!s.offer("token", Value::Str("t2".into())).unwrap());
        s.consume("token", ValueKind::Str).unwrap();
        assert!(s.offer("token", Value::Str("t2".into())).unwrap());
        assert!(matches!(s.get("token", ValueKind::Str).unwrap(), Value::Str(v) if v == "t2"));
    }

    #[test]
    fn ensure_only_overwrites_present_slots() {
        let s = store();
        s.define("token", Value::Str("t1".into())).unwrap();
        assert!(s.ensure("token", Value::Str("t2".into())).unwrap());
        s.consume("token", ValueKind::Str).unwrap();
        assert!(!s.ensure("token", Value::Str("t3".into())).unwrap());
    }

    #[test]
    fn get_or_defaults_on_missing_and_consumed() {
        let s = store();
        assert!(matches!(
            s.get_or("absent", ValueKind::Int, Value::Int(5)).unwrap(),
            Value::Int(5)
        ));
        s.define("n", Value::Int(1)).unwrap();
        s.consume("n", ValueKind::Int).unwrap();
        assert!(matches!(s.get_or("n", ValueKind::Int, Value::Int(9)).unwrap(), Value::Int(9)));
        // A present value with the wrong kind is still an error.
        s.define("flag", Value::Bool(true)).unwrap();
        assert!(s.get_or("flag", ValueKind::Int, Value::Int(0)).is_err());
    }

    #[test]
    fn apply_transforms_in_place() {
        let s = store();
        s.define("count", Value::Int(41)).unwrap();
        let next = s
            .apply("count", ValueKind::Int, |v| match v {
                Value::Int(n) => Value::Int(n + 1),
                other => other,
            })
            .unwrap();
        assert!(matches!(next, Value::Int(42)));
    }

    #[test]
    fn version_moves_only_on_mutation() {
        let s = store();
        let v0 = s.version();
        s.define("k", Value::Int(0)).unwrap();
        let v1 = s.version();
        assert!(v1 > v0);
        let _ = s.get("k", ValueKind::Int).unwrap();
        assert_eq!(s.version(), v1);
    }
}
