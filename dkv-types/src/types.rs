//! Blob types carried across the store boundary.

use bytes::Bytes;
use std::fmt;

/// A store key. Construction trims leading and trailing ASCII whitespace,
/// so two keys that differ only in surrounding whitespace are the same key.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let start = data.iter().position(|b| !b.is_ascii_whitespace());
        let Some(start) = start else {
            return Key(Bytes::new());
        };
        // A non-whitespace byte exists, so rposition is Some.
        let end = data.iter().rposition(|b| !b.is_ascii_whitespace()).unwrap_or(start);
        Key(data.slice(start..=end))
    }

    /// A key built from already-trimmed bytes, e.g. straight off the wire.
    pub fn from_raw(data: impl Into<Bytes>) -> Self {
        Key(data.into())
    }

    pub fn empty() -> Self {
        Key(Bytes::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes this key occupies in a raw wire section: length word plus payload.
    pub fn raw_size(&self) -> usize {
        4 + self.0.len()
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(prefix.as_bytes())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Key({s:?})"),
            Err(_) => write!(f, "Key({} bytes)", self.0.len()),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::new(Bytes::from(s.into_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key::new(Bytes::from(v))
    }
}

/// A store value. Opaque bytes; zero-length values are legal.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Value(Bytes);

impl Value {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Value(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn raw_size(&self) -> usize {
        4 + self.0.len()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.len() <= 64 => write!(f, "Value({s:?})"),
            _ => write!(f, "Value({} bytes)", self.0.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(Bytes::from(s.into_bytes()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value(Bytes::from(v))
    }
}

/// A key/value pair as it crosses the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Entry {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn raw_size(&self) -> usize {
        self.key.raw_size() + self.value.raw_size()
    }
}
