//! Wire codec.
//!
//! A frame is a 4-byte little-endian signed length followed by exactly that
//! many payload bytes. The payload is a flat, ordered list of fields:
//!
//! ```text
//! field := tag:u16le kind:u8 value
//! value := i64le | f64le | u32le-len utf8 | 3×f64le | 4×f64le | u32le-len field*
//! ```
//!
//! Tag 0 carries the message kind, tags 1 and 2 the optional physics and
//! session ids. Everything above that is defined per message kind in
//! [`crate::message`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    math::{Vec3, Vec4},
    message::Message,
};

/// Field tag.
pub type Tag = u16;

/// Tag of the message kind discriminator.
pub const TAG_KIND: Tag = 0;
/// Tag of the physics (server side) id.
pub const TAG_SERVER_ID: Tag = 1;
/// Tag of the session (client side) id.
pub const TAG_CLIENT_ID: Tag = 2;
/// First tag available to kind-specific fields.
pub const TAG_FIRST_FIELD: Tag = 3;

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

const KIND_INT: u8 = 1;
const KIND_FLOAT: u8 = 2;
const KIND_STR: u8 = 3;
const KIND_VEC3: u8 = 4;
const KIND_VEC4: u8 = 5;
const KIND_MAP: u8 = 6;

/// Nested maps deeper than this are rejected rather than recursed into.
const MAX_DEPTH: usize = 8;

/// Errors surfaced while decoding a frame. Both are recoverable: the frame is
/// dropped and the connection stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unknown message kind {0}")]
    UnknownMessageKind(i64),
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CodecError::MalformedFrame(reason.into())
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Vec3(Vec3),
    Vec4(Vec4),
    Map(FieldMap),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Vec3(_) => "vec3",
            Value::Vec4(_) => "vec4",
            Value::Map(_) => "map",
        }
    }
}

/// Ordered tag → value pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap {
    fields: Vec<(Tag, Value)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: Tag, value: Value) {
        self.fields.push((tag, value));
    }

    /// Pushes `value` only when present.
    pub fn push_opt<T: Into<Value>>(&mut self, tag: Tag, value: Option<T>) {
        if let Some(v) = value {
            self.push(tag, v.into());
        }
    }

    /// First value stored under `tag`.
    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Tag, Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn int(&self, tag: Tag) -> Result<Option<i64>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(mismatch(tag, "int", other)),
        }
    }

    /// Floats also accept integer-encoded values; some senders drop the fraction.
    pub fn float(&self, tag: Tag) -> Result<Option<f64>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Float(v)) => Ok(Some(*v)),
            Some(Value::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(mismatch(tag, "float", other)),
        }
    }

    pub fn string(&self, tag: Tag) -> Result<Option<String>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(other) => Err(mismatch(tag, "string", other)),
        }
    }

    pub fn vec3(&self, tag: Tag) -> Result<Option<Vec3>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Vec3(v)) => Ok(Some(*v)),
            Some(other) => Err(mismatch(tag, "vec3", other)),
        }
    }

    pub fn vec4(&self, tag: Tag) -> Result<Option<Vec4>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Vec4(v)) => Ok(Some(*v)),
            Some(other) => Err(mismatch(tag, "vec4", other)),
        }
    }

    pub fn map(&self, tag: Tag) -> Result<Option<&FieldMap>, CodecError> {
        match self.get(tag) {
            None => Ok(None),
            Some(Value::Map(v)) => Ok(Some(v)),
            Some(other) => Err(mismatch(tag, "map", other)),
        }
    }

    /// Booleans travel as integers.
    pub fn flag(&self, tag: Tag) -> Result<Option<bool>, CodecError> {
        Ok(self.int(tag)?.map(|v| v != 0))
    }
}

fn mismatch(tag: Tag, expected: &str, got: &Value) -> CodecError {
    CodecError::malformed(format!(
        "field {tag}: expected {expected}, got {}",
        got.type_name()
    ))
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vec3(v)
    }
}

impl From<Vec4> for Value {
    fn from(v: Vec4) -> Self {
        Value::Vec4(v)
    }
}

impl From<FieldMap> for Value {
    fn from(v: FieldMap) -> Self {
        Value::Map(v)
    }
}

// ─── Encoding ───

/// Encodes a message as a complete frame, length prefix included.
pub fn encode(msg: &Message) -> Bytes {
    let fields = msg.to_fields();
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + 64);
    buf.put_i32_le(0);
    put_fields(&mut buf, &fields);
    let len = (buf.len() - LEN_PREFIX) as i32;
    buf[..LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
    buf.freeze()
}

/// Encodes just the payload (no length prefix).
pub fn encode_payload(fields: &FieldMap) -> Bytes {
    let mut buf = BytesMut::new();
    put_fields(&mut buf, fields);
    buf.freeze()
}

fn put_fields(buf: &mut BytesMut, fields: &FieldMap) {
    for (tag, value) in fields.iter() {
        buf.put_u16_le(*tag);
        put_value(buf, value);
    }
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Int(v) => {
            buf.put_u8(KIND_INT);
            buf.put_i64_le(*v);
        }
        Value::Float(v) => {
            buf.put_u8(KIND_FLOAT);
            buf.put_f64_le(*v);
        }
        Value::Str(s) => {
            buf.put_u8(KIND_STR);
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        Value::Vec3(v) => {
            buf.put_u8(KIND_VEC3);
            buf.put_f64_le(v.x);
            buf.put_f64_le(v.y);
            buf.put_f64_le(v.z);
        }
        Value::Vec4(v) => {
            buf.put_u8(KIND_VEC4);
            buf.put_f64_le(v.w);
            buf.put_f64_le(v.x);
            buf.put_f64_le(v.y);
            buf.put_f64_le(v.z);
        }
        Value::Map(m) => {
            buf.put_u8(KIND_MAP);
            let len_at = buf.len();
            buf.put_u32_le(0);
            put_fields(buf, m);
            let len = (buf.len() - len_at - 4) as u32;
            buf[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
        }
    }
}

// ─── Decoding ───

/// Parses a length prefix. Non-positive lengths are malformed.
pub fn parse_len_prefix(prefix: [u8; LEN_PREFIX]) -> Result<usize, CodecError> {
    let len = i32::from_le_bytes(prefix);
    if len <= 0 {
        return Err(CodecError::malformed(format!("non-positive length {len}")));
    }
    Ok(len as usize)
}

/// Decodes a complete frame, length prefix included.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    if frame.len() < LEN_PREFIX {
        return Err(CodecError::malformed("truncated length prefix"));
    }
    let (head, payload) = frame.split_at(LEN_PREFIX);
    let mut prefix = [0u8; LEN_PREFIX];
    prefix.copy_from_slice(head);
    let len = parse_len_prefix(prefix)?;
    if payload.len() != len {
        return Err(CodecError::malformed(format!(
            "length prefix {len} does not match payload of {} bytes",
            payload.len()
        )));
    }
    decode_payload(payload)
}

/// Decodes a payload (the bytes after the length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Message, CodecError> {
    let fields = decode_fields(payload)?;
    Message::from_fields(&fields)
}

/// Parses raw fields without applying any message schema.
pub fn decode_fields(payload: &[u8]) -> Result<FieldMap, CodecError> {
    let mut rd = Reader { buf: payload };
    rd.fields(0)
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::malformed(format!(
                "truncated: wanted {n} bytes, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn fields(&mut self, depth: usize) -> Result<FieldMap, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::malformed("maps nested too deeply"));
        }
        let mut map = FieldMap::new();
        while !self.buf.is_empty() {
            let tag = self.u16()?;
            let value = self.value(depth)?;
            map.push(tag, value);
        }
        Ok(map)
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        let kind = self.u8()?;
        let value = match kind {
            KIND_INT => Value::Int(self.i64()?),
            KIND_FLOAT => Value::Float(self.f64()?),
            KIND_STR => {
                let len = self.u32()? as usize;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| CodecError::malformed(format!("invalid utf-8: {e}")))?;
                Value::Str(s.to_owned())
            }
            KIND_VEC3 => Value::Vec3(Vec3::new(self.f64()?, self.f64()?, self.f64()?)),
            KIND_VEC4 => Value::Vec4(Vec4::new(self.f64()?, self.f64()?, self.f64()?, self.f64()?)),
            KIND_MAP => {
                let len = self.u32()? as usize;
                let mut inner = Reader {
                    buf: self.take(len)?,
                };
                Value::Map(inner.fields(depth + 1)?)
            }
            other => return Err(CodecError::malformed(format!("unknown value kind {other}"))),
        };
        Ok(value)
    }
}
