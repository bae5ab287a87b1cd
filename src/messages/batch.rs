//! # Atomic multi-operation scope over one channel.
//!
//! [`BatchGuard`] holds the channel's lock for its whole lifetime so several
//! reads, writes, and consumes observe one consistent snapshot. Only the
//! guard's own accessors are safe inside the scope: any other method on the
//! same channel blocks on the lock the guard is holding and deadlocks by
//! design. Existing keys only; defining new keys happens outside the scope.

use parking_lot::MutexGuard;

use crate::error::ChannelError;
use crate::messages::store::Inner;
use crate::messages::value::{Value, ValueKind};

/// Lock-holding operator for atomic channel access.
pub struct BatchGuard<'a> {
    channel: &'static str,
    inner: MutexGuard<'a, Inner>,
    dirty: bool,
    touched: Vec<String>,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn new(channel: &'static str, inner: MutexGuard<'a, Inner>) -> Self {
        Self { channel, inner, dirty: false, touched: Vec::new() }
    }

    /// Keys mutated inside this scope, in first-touch order.
    pub(crate) fn touched(&self) -> &[String] {
        &self.touched
    }

    /// True when the key is defined (consumed or not).
    pub fn exists_key(&self, key: &str) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// True when the key is defined but its value has been consumed.
    pub fn consumed(&self, key: &str) -> bool {
        self.inner.slots.get(key).map(|s| s.value.is_none()).unwrap_or(false)
    }

    /// Returns the value for `key`.
    pub fn get_value(&self, key: &str, kind: ValueKind) -> Result<Value, ChannelError> {
        let slot = self.inner.slots.get(key).ok_or_else(|| ChannelError::KeyNotFound {
            channel: self.channel,
            key: key.to_string(),
        })?;
        if slot.kind != kind {
            return Err(ChannelError::TypeMismatch {
                channel: self.channel,
                key: key.to_string(),
                expected: slot.kind,
                found: kind,
            });
        }
        slot.value.clone().ok_or_else(|| ChannelError::ValueConsumed {
            channel: self.channel,
            key: key.to_string(),
        })
    }

    /// Installs `value` under the existing key, re-filling a consumed slot.
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<(), ChannelError> {
        if value.is_null() {
            return Err(ChannelError::NullValue { channel: self.channel, key: key.to_string() });
        }
        let channel = self.channel;
        let slot = self.inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
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
        self.dirty = true;
        if !self.touched.iter().any(|k| k == key) {
            self.touched.push(key.to_string());
        }
        Ok(())
    }

    /// Removes and returns the value; the key stays defined.
    pub fn consume_value(&mut self, key: &str, kind: ValueKind) -> Result<Value, ChannelError> {
        let channel = self.channel;
        let slot = self.inner.slots.get_mut(key).ok_or_else(|| ChannelError::KeyNotFound {
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
        self.dirty = true;
        if !self.touched.iter().any(|k| k == key) {
            self.touched.push(key.to_string());
        }
        Ok(prev)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.dirty {
            self.inner.version += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::store::Store;
    use crate::messages::value::{Value, ValueKind};

    #[test]
    fn batch_sees_one_consistent_snapshot() {
        let s = Store::new("common");
        s.define("a", Value::Int(1)).unwrap();
        s.define("b", Value::Int(2)).unwrap();

        {
            let mut batch = s.batch();
            assert!(batch.exists_key("a"));
            let a = batch.consume_value("a", ValueKind::Int).unwrap();
            assert!(matches!(a, Value::Int(1)));
            assert!(batch.consumed("a"));
            batch.set_value("b", Value::Int(3)).unwrap();
        }

        assert!(matches!(s.get("b", ValueKind::Int).unwrap(), Value::Int(3)));
        assert_eq!(s.get("a", ValueKind::Int).unwrap_err().as_label(), "channel_value_consumed");
    }

    #[test]
    fn batch_bumps_version_once_when_dirty() {
        let s = Store::new("common");
        s.define("a", Value::Int(1)).unwrap();
        let v0 = s.version();
        {
            let mut batch = s.batch();
            batch.set_value("a", Value::Int(2)).unwrap();
            batch.set_value("a", Value::Int(3)).unwrap();
        }
        assert_eq!(s.version(), v0 + 1);

        // A read-only batch leaves the version alone.
        {
            let batch = s.batch();
            let _ = batch.get_value("a", ValueKind::Int).unwrap();
        }
        assert_eq!(s.version(), v0 + 1);
    }
}
