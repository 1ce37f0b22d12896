//! The dynamically-typed value tree produced by the decoders.
//!
//! Every substream decodes into a [`Value`]: a sum over the value shapes a
//! replay schema can describe. Structs preserve the field order of the
//! schema they were decoded under, which callers (and `__parent` splicing)
//! rely on.

use std::fmt;
use std::fmt::Write as _;

/// A decoded replay value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Nothing: absent optionals, out-of-range choices, `_null` types.
    Null,
    /// A single decoded bit.
    Bool(bool),
    /// An integer, up to 64 bits wide on the wire.
    Int(i64),
    /// A blob or four-character code. Non-UTF-8 bytes are replaced.
    Str(String),
    /// A bit array with an exact bit count.
    BitArray(BitArray),
    /// A homogeneous list.
    Array(Vec<Value>),
    /// An ordered set of named fields.
    Struct(Struct),
}

impl Value {
    /// Returns the integer payload, or `None` for other variants.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bit_array(&self) -> Option<&BitArray> {
        match self {
            Value::BitArray(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A decoded struct: named fields in schema declaration order.
///
/// Lookup is by name; iteration yields fields in the order they were
/// decoded. The order is part of the decoding contract: `__parent`
/// splicing merges parent fields left-to-right and later writes to the same
/// name overwrite in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Struct {
    fields: Vec<(String, Value)>,
}

impl Struct {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sets a field, overwriting in place when the name already exists so
    /// the original position is kept.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    // -------------------------------------------------------------------
    // Path accessors. These are a projection convenience: a mismatched or
    // absent path yields the type's zero value rather than an error.
    // -------------------------------------------------------------------

    /// Returns the value at `path`, descending through nested structs.
    pub fn value(&self, path: &[&str]) -> Option<&Value> {
        let (last, front) = path.split_last()?;
        let mut current = self;
        for name in front {
            current = current.get(name)?.as_struct()?;
        }
        current.get(last)
    }

    /// Returns the sub-struct at `path`, or `None` on mismatch.
    pub fn structv(&self, path: &[&str]) -> Option<&Struct> {
        self.value(path)?.as_struct()
    }

    /// Returns the integer at `path`, or 0 on mismatch.
    pub fn int(&self, path: &[&str]) -> i64 {
        self.value(path).and_then(Value::as_int).unwrap_or(0)
    }

    /// Returns the bool at `path`, or false on mismatch.
    pub fn bool(&self, path: &[&str]) -> bool {
        self.value(path).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns the string at `path`, or "" on mismatch.
    pub fn text(&self, path: &[&str]) -> &str {
        self.value(path).and_then(Value::as_str).unwrap_or("")
    }

    /// Returns the array at `path`, or an empty slice on mismatch.
    pub fn array(&self, path: &[&str]) -> &[Value] {
        self.value(path).and_then(Value::as_array).unwrap_or(&[])
    }

    /// Returns the bit array at `path`, or `None` on mismatch.
    pub fn bit_array(&self, path: &[&str]) -> Option<&BitArray> {
        self.value(path)?.as_bit_array()
    }
}

impl IntoIterator for Struct {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Value)> for Struct {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut s = Struct::new();
        for (name, value) in iter {
            s.set(name, value);
        }
        s
    }
}

/// A bit array: an exact bit count over a packed byte buffer.
///
/// Bits are stored most-significant-first within each byte: bit 0 of the
/// array is the high bit of `data[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitArray {
    /// Number of valid bits.
    pub count: usize,
    /// `ceil(count / 8)` bytes holding the bits.
    pub data: Vec<u8>,
}

impl BitArray {
    /// Tests the bit at the given zero-based position.
    pub fn bit(&self, n: usize) -> bool {
        self.data[n >> 3] & (0x80 >> (n & 0x07)) != 0
    }

    /// Number of one bits in the array.
    pub fn ones(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl fmt::Display for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{} (count={})", hex(&self.data), self.count)
    }
}

fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{b:02x}");
    }
    out
}

// -----------------------------------------------------------------------
// JSON projection
// -----------------------------------------------------------------------

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::json!(n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::BitArray(b) => serde_json::json!({
                "count": b.count,
                "data": format!("0x{}", hex(&b.data)),
            }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Struct(s) => serde_json::Value::from(s),
        }
    }
}

impl From<&Struct> for serde_json::Value {
    fn from(s: &Struct) -> Self {
        let map: serde_json::Map<String, serde_json::Value> = s
            .iter()
            .map(|(name, value)| (name.to_owned(), serde_json::Value::from(value)))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::Value::from(self);
        match serde_json::to_string_pretty(&json) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Display for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::Value::from(self);
        match serde_json::to_string_pretty(&json) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}
