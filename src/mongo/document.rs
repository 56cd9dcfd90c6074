//! Minimal BSON document codec.
//!
//! Covers the element types MongoDB admin command responses actually use;
//! exotic types fail decoding loudly rather than corrupting offsets. Key
//! order is preserved because command documents are order-sensitive (the
//! command name must be the first key).

use std::fmt;

use crate::error::{OperatorError, Result};

/// A BSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    /// Generic binary, carrying its subtype byte.
    Binary { subtype: u8, bytes: Vec<u8> },
    ObjectId([u8; 12]),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Null,
    Int32(i32),
    /// Internal MongoDB timestamp (oplog ordering).
    Timestamp { time: u32, increment: u32 },
    Int64(i64),
}

impl Value {
    /// Numeric widening: int32, int64, and integral doubles all land here.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    fn type_byte(&self) -> u8 {
        match self {
            Value::Double(_) => 0x01,
            Value::String(_) => 0x02,
            Value::Document(_) => 0x03,
            Value::Array(_) => 0x04,
            Value::Binary { .. } => 0x05,
            Value::ObjectId(_) => 0x07,
            Value::Bool(_) => 0x08,
            Value::DateTime(_) => 0x09,
            Value::Null => 0x0A,
            Value::Int32(_) => 0x10,
            Value::Timestamp { .. } => 0x11,
            Value::Int64(_) => 0x12,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// An ordered BSON document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn push(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    /// Serialize to BSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]); // length backpatched below

        for (key, value) in &self.entries {
            buf.push(value.type_byte());
            buf.extend_from_slice(key.as_bytes());
            buf.push(0);
            encode_value(value, buf);
        }

        buf.push(0);
        let len = (buf.len() - start) as i32;
        buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Parse one document from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        let doc = reader.read_document()?;
        Ok(doc)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value:?}")?;
        }
        write!(f, "}}")
    }
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => {
            buf.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        Value::Document(d) => d.encode_into(buf),
        Value::Array(items) => {
            let mut doc = Document::new();
            for (i, item) in items.iter().enumerate() {
                doc.insert(i.to_string(), item.clone());
            }
            doc.encode_into(buf);
        }
        Value::Binary { subtype, bytes } => {
            buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            buf.push(*subtype);
            buf.extend_from_slice(bytes);
        }
        Value::ObjectId(oid) => buf.extend_from_slice(oid),
        Value::Bool(b) => buf.push(*b as u8),
        Value::DateTime(ms) => buf.extend_from_slice(&ms.to_le_bytes()),
        Value::Null => {}
        Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Timestamp { time, increment } => {
            buf.extend_from_slice(&increment.to_le_bytes());
            buf.extend_from_slice(&time.to_le_bytes());
        }
        Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(OperatorError::Wire("truncated bson document".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| OperatorError::Wire("unterminated cstring".into()))?;
        let s = String::from_utf8(rest[..nul].to_vec())
            .map_err(|e| OperatorError::Wire(format!("invalid utf8 in key: {e}")))?;
        self.pos += nul + 1;
        Ok(s)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(OperatorError::Wire(format!("invalid string length {len}")));
        }
        let raw = self.take(len as usize)?;
        let (body, terminator) = raw.split_at(len as usize - 1);
        if terminator != [0] {
            return Err(OperatorError::Wire("string missing nul terminator".into()));
        }
        String::from_utf8(body.to_vec())
            .map_err(|e| OperatorError::Wire(format!("invalid utf8 in string: {e}")))
    }

    fn read_document(&mut self) -> Result<Document> {
        let start = self.pos;
        let len = self.read_i32()?;
        if len < 5 {
            return Err(OperatorError::Wire(format!("invalid document length {len}")));
        }
        let end = start + len as usize;
        if end > self.bytes.len() {
            return Err(OperatorError::Wire("truncated bson document".into()));
        }

        let mut doc = Document::new();
        loop {
            let type_byte = self.take(1)?[0];
            if type_byte == 0 {
                break;
            }
            let key = self.read_cstring()?;
            let value = self.read_value(type_byte)?;
            doc.insert(key, value);
        }

        if self.pos != end {
            return Err(OperatorError::Wire("document length mismatch".into()));
        }
        Ok(doc)
    }

    fn read_value(&mut self, type_byte: u8) -> Result<Value> {
        match type_byte {
            0x01 => {
                let b = self.take(8)?;
                Ok(Value::Double(f64::from_le_bytes(b.try_into().unwrap())))
            }
            0x02 => Ok(Value::String(self.read_string()?)),
            0x03 => Ok(Value::Document(self.read_document()?)),
            0x04 => {
                let doc = self.read_document()?;
                Ok(Value::Array(
                    doc.entries.into_iter().map(|(_, v)| v).collect(),
                ))
            }
            0x05 => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(OperatorError::Wire("negative binary length".into()));
                }
                let subtype = self.take(1)?[0];
                let bytes = self.take(len as usize)?.to_vec();
                Ok(Value::Binary { subtype, bytes })
            }
            0x06 => Ok(Value::Null), // deprecated "undefined"
            0x07 => {
                let b = self.take(12)?;
                Ok(Value::ObjectId(b.try_into().unwrap()))
            }
            0x08 => Ok(Value::Bool(self.take(1)?[0] != 0)),
            0x09 => Ok(Value::DateTime(self.read_i64()?)),
            0x0A => Ok(Value::Null),
            0x10 => Ok(Value::Int32(self.read_i32()?)),
            0x11 => {
                let increment = self.read_u32()?;
                let time = self.read_u32()?;
                Ok(Value::Timestamp { time, increment })
            }
            0x12 => Ok(Value::Int64(self.read_i64()?)),
            other => Err(OperatorError::Wire(format!(
                "unsupported bson element type 0x{other:02x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        let doc = Document::new();
        let bytes = doc.to_bytes();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
        assert_eq!(Document::from_bytes(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_command_shape_roundtrip() {
        let doc = Document::new()
            .push("hello", 1i32)
            .push("$db", "admin")
            .push("ok", 1.0f64)
            .push("setName", "rs0")
            .push("isWritablePrimary", true)
            .push("nested", Document::new().push("version", 2i64))
            .push(
                "hosts",
                vec![Value::from("10.0.0.2:27017"), Value::from("10.0.0.3:27017")],
            );

        let decoded = Document::from_bytes(&doc.to_bytes()).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.get_i64("hello"), Some(1));
        assert_eq!(decoded.get_str("setName"), Some("rs0"));
        assert_eq!(decoded.get_bool("isWritablePrimary"), Some(true));
        assert_eq!(
            decoded.get_document("nested").unwrap().get_i64("version"),
            Some(2)
        );
        assert_eq!(decoded.get_array("hosts").unwrap().len(), 2);
    }

    #[test]
    fn test_numeric_widening() {
        let doc = Document::new().push("ok", 1.0f64).push("version", 3i32);
        assert_eq!(doc.get_i64("ok"), Some(1));
        assert_eq!(doc.get_i64("version"), Some(3));
        assert_eq!(doc.get_f64("version"), Some(3.0));
    }

    #[test]
    fn test_binary_and_special_types() {
        let doc = Document::new()
            .push(
                "payload",
                Value::Binary {
                    subtype: 0,
                    bytes: b"n,,n=root,r=abc".to_vec(),
                },
            )
            .push("oid", Value::ObjectId([7; 12]))
            .push("at", Value::DateTime(1_700_000_000_000))
            .push(
                "opTime",
                Value::Timestamp {
                    time: 1_700_000_000,
                    increment: 4,
                },
            )
            .push("nothing", Value::Null);

        let decoded = Document::from_bytes(&doc.to_bytes()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let doc = Document::new().push("key", "value");
        let bytes = doc.to_bytes();
        assert!(Document::from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut bytes = Document::new().push("a", 1i32).to_bytes();
        bytes[0] += 1; // lie about the length
        assert!(Document::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_array_preserves_order() {
        let doc = Document::new().push(
            "members",
            vec![
                Value::from(Document::new().push("_id", 0i32).push("host", "a:1")),
                Value::from(Document::new().push("_id", 1i32).push("host", "b:1")),
            ],
        );
        let decoded = Document::from_bytes(&doc.to_bytes()).unwrap();
        let members = decoded.get_array("members").unwrap();
        assert_eq!(
            members[0].as_document().unwrap().get_i64("_id"),
            Some(0)
        );
        assert_eq!(
            members[1].as_document().unwrap().get_str("host"),
            Some("b:1")
        );
    }
}
