//! Value codec for the kRPC wire union.
//!
//! kRPC procedures exchange a closed union of protobuf-encoded values:
//! zigzag/plain varints, IEEE-754 fixed floats, length-prefixed strings
//! and blobs, object handles, enumerations, nestable collections and
//! positional tuples, plus whole protobuf messages. Scalars travel as
//! bare payloads; only collections get a wrapper message.
//!
//! Encoding is driven by the value itself, decoding by a [TypeHint]
//! supplied by the caller (generated bindings pass the declared type of
//! the procedure). Both directions are recursive and reentrant, and for
//! every well-typed value `decode(encode(v), hint_of(v)) == v`.

mod convert;

pub use convert::{marshal, unmarshal, KrpcValue};

use bytes::{Buf, BufMut, Bytes};
use prost::Message;

use crate::error::{CodecError, ValueKind};
use crate::proto;

/// A decoded kRPC wire value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The result of a void procedure: zero payload bytes.
    Void,
    SInt32(i32),
    SInt64(i64),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Bytes),
    /// A server-side object handle. Id 0 is the null handle.
    Object(u64),
    /// The raw integer of an enumeration constant.
    Enum(i32),
    List(Vec<Value>),
    Set(Vec<Value>),
    Dictionary(Vec<(Value, Value)>),
    Tuple(Vec<Value>),
    /// A protobuf message in its own encoding, carried opaquely.
    Message(Bytes),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Void => ValueKind::Void,
            Value::SInt32(_) => ValueKind::SInt32,
            Value::SInt64(_) => ValueKind::SInt64,
            Value::UInt32(_) => ValueKind::UInt32,
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Object(_) => ValueKind::Class,
            Value::Enum(_) => ValueKind::Enumeration,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Dictionary(_) => ValueKind::Dictionary,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Message(_) => ValueKind::Message,
        }
    }

    /// True for the reserved null object handle.
    pub fn is_null_handle(&self) -> bool {
        matches!(self, Value::Object(0))
    }
}

/// Expected shape of a value being decoded.
///
/// Mirrors the schema's `Type` message with the names dropped: the codec
/// cares about shape only, the binding layer owns naming.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeHint {
    Void,
    SInt32,
    SInt64,
    UInt32,
    UInt64,
    Bool,
    Float,
    Double,
    String,
    Bytes,
    Class,
    Enumeration,
    List(Box<TypeHint>),
    Set(Box<TypeHint>),
    Dictionary(Box<TypeHint>, Box<TypeHint>),
    Tuple(Vec<TypeHint>),
    Message,
}

impl TypeHint {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypeHint::Void => ValueKind::Void,
            TypeHint::SInt32 => ValueKind::SInt32,
            TypeHint::SInt64 => ValueKind::SInt64,
            TypeHint::UInt32 => ValueKind::UInt32,
            TypeHint::UInt64 => ValueKind::UInt64,
            TypeHint::Bool => ValueKind::Bool,
            TypeHint::Float => ValueKind::Float,
            TypeHint::Double => ValueKind::Double,
            TypeHint::String => ValueKind::String,
            TypeHint::Bytes => ValueKind::Bytes,
            TypeHint::Class => ValueKind::Class,
            TypeHint::Enumeration => ValueKind::Enumeration,
            TypeHint::List(_) => ValueKind::List,
            TypeHint::Set(_) => ValueKind::Set,
            TypeHint::Dictionary(_, _) => ValueKind::Dictionary,
            TypeHint::Tuple(_) => ValueKind::Tuple,
            TypeHint::Message => ValueKind::Message,
        }
    }

    /// Shape of a schema `Type`. A `NONE` code is the void shape, not an
    /// absent one; absence of a return type is the caller's `Option`.
    pub fn from_schema(ty: &proto::Type) -> Option<TypeHint> {
        use proto::TypeCode;
        let hint = match ty.code() {
            TypeCode::None => TypeHint::Void,
            TypeCode::Double => TypeHint::Double,
            TypeCode::Float => TypeHint::Float,
            TypeCode::Sint32 => TypeHint::SInt32,
            TypeCode::Sint64 => TypeHint::SInt64,
            TypeCode::Uint32 => TypeHint::UInt32,
            TypeCode::Uint64 => TypeHint::UInt64,
            TypeCode::Bool => TypeHint::Bool,
            TypeCode::String => TypeHint::String,
            TypeCode::Bytes => TypeHint::Bytes,
            TypeCode::Class => TypeHint::Class,
            TypeCode::Enumeration => TypeHint::Enumeration,
            TypeCode::ProcedureCall
            | TypeCode::Stream
            | TypeCode::Event
            | TypeCode::Status
            | TypeCode::Services => TypeHint::Message,
            TypeCode::List => TypeHint::List(Box::new(Self::from_schema(ty.types.first()?)?)),
            TypeCode::Set => TypeHint::Set(Box::new(Self::from_schema(ty.types.first()?)?)),
            TypeCode::Dictionary => TypeHint::Dictionary(
                Box::new(Self::from_schema(ty.types.first()?)?),
                Box::new(Self::from_schema(ty.types.get(1)?)?),
            ),
            TypeCode::Tuple => TypeHint::Tuple(
                ty.types.iter().map(Self::from_schema).collect::<Option<Vec<_>>>()?,
            ),
        };
        Some(hint)
    }
}

#[inline]
fn zigzag32(v: i32) -> u64 {
    (((v << 1) ^ (v >> 31)) as u32) as u64
}

#[inline]
fn unzigzag32(v: u64) -> i32 {
    let v = v as u32;
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

#[inline]
fn zigzag64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encode a value as its bare kRPC wire payload.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf)?;
    Ok(buf)
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    use prost::encoding::encode_varint;
    match value {
        Value::Void => {}
        Value::SInt32(v) => encode_varint(zigzag32(*v), buf),
        Value::SInt64(v) => encode_varint(zigzag64(*v), buf),
        Value::UInt32(v) => encode_varint(*v as u64, buf),
        Value::UInt64(v) => encode_varint(*v, buf),
        Value::Bool(v) => encode_varint(*v as u64, buf),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(v) => {
            encode_varint(v.len() as u64, buf);
            buf.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            encode_varint(v.len() as u64, buf);
            buf.extend_from_slice(v);
        }
        Value::Object(id) => encode_varint(*id, buf),
        Value::Enum(v) => encode_varint(zigzag32(*v), buf),
        Value::List(items) => {
            let mut wrapper = proto::List::default();
            for item in items {
                wrapper.items.push(encode(item)?);
            }
            buf.extend_from_slice(&wrapper.encode_to_vec());
        }
        Value::Set(items) => {
            let mut wrapper = proto::Set::default();
            for item in items {
                wrapper.items.push(encode(item)?);
            }
            buf.extend_from_slice(&wrapper.encode_to_vec());
        }
        Value::Dictionary(entries) => {
            let mut wrapper = proto::Dictionary::default();
            for (key, value) in entries {
                wrapper.entries.push(proto::DictionaryEntry {
                    key: encode(key)?,
                    value: encode(value)?,
                });
            }
            buf.extend_from_slice(&wrapper.encode_to_vec());
        }
        Value::Tuple(items) => {
            let mut wrapper = proto::Tuple::default();
            for item in items {
                wrapper.items.push(encode(item)?);
            }
            buf.extend_from_slice(&wrapper.encode_to_vec());
        }
        Value::Message(raw) => buf.extend_from_slice(raw),
    }
    Ok(())
}

/// Decode a bare kRPC wire payload under the expected shape.
pub fn decode(buf: &[u8], hint: &TypeHint) -> Result<Value, CodecError> {
    let value = match hint {
        TypeHint::Void => {
            if !buf.is_empty() {
                return Err(CodecError::TrailingBytes(ValueKind::Void));
            }
            Value::Void
        }
        TypeHint::SInt32 => Value::SInt32(unzigzag32(decode_whole_varint(buf, hint)?)),
        TypeHint::SInt64 => Value::SInt64(unzigzag64(decode_whole_varint(buf, hint)?)),
        TypeHint::UInt32 => Value::UInt32(decode_whole_varint(buf, hint)? as u32),
        TypeHint::UInt64 => Value::UInt64(decode_whole_varint(buf, hint)?),
        TypeHint::Bool => Value::Bool(decode_whole_varint(buf, hint)? != 0),
        TypeHint::Float => {
            let mut b = check_len(buf, 4, hint)?;
            Value::Float(b.get_f32_le())
        }
        TypeHint::Double => {
            let mut b = check_len(buf, 8, hint)?;
            Value::Double(b.get_f64_le())
        }
        TypeHint::String => {
            let raw = decode_len_prefixed(buf, hint)?;
            match std::str::from_utf8(raw) {
                Ok(s) => Value::String(s.to_string()),
                Err(_) => return Err(CodecError::InvalidUtf8),
            }
        }
        TypeHint::Bytes => Value::Bytes(Bytes::copy_from_slice(decode_len_prefixed(buf, hint)?)),
        TypeHint::Class => Value::Object(decode_whole_varint(buf, hint)?),
        TypeHint::Enumeration => Value::Enum(unzigzag32(decode_whole_varint(buf, hint)?)),
        TypeHint::List(elem) => {
            let wrapper = proto::List::decode(buf)
                .map_err(|_| CodecError::Wrapper(ValueKind::List))?;
            let mut items = Vec::with_capacity(wrapper.items.len());
            for raw in &wrapper.items {
                items.push(decode(raw, elem)?);
            }
            Value::List(items)
        }
        TypeHint::Set(elem) => {
            let wrapper = proto::Set::decode(buf)
                .map_err(|_| CodecError::Wrapper(ValueKind::Set))?;
            let mut items = Vec::with_capacity(wrapper.items.len());
            for raw in &wrapper.items {
                items.push(decode(raw, elem)?);
            }
            Value::Set(items)
        }
        TypeHint::Dictionary(key_hint, value_hint) => {
            let wrapper = proto::Dictionary::decode(buf)
                .map_err(|_| CodecError::Wrapper(ValueKind::Dictionary))?;
            let mut entries = Vec::with_capacity(wrapper.entries.len());
            for entry in &wrapper.entries {
                entries.push((decode(&entry.key, key_hint)?, decode(&entry.value, value_hint)?));
            }
            Value::Dictionary(entries)
        }
        TypeHint::Tuple(hints) => {
            let wrapper = proto::Tuple::decode(buf)
                .map_err(|_| CodecError::Wrapper(ValueKind::Tuple))?;
            if wrapper.items.len() != hints.len() {
                return Err(CodecError::WrongTupleArity {
                    expected: hints.len(),
                    got: wrapper.items.len(),
                });
            }
            let mut items = Vec::with_capacity(hints.len());
            for (raw, item_hint) in wrapper.items.iter().zip(hints) {
                items.push(decode(raw, item_hint)?);
            }
            Value::Tuple(items)
        }
        TypeHint::Message => Value::Message(Bytes::copy_from_slice(buf)),
    };
    Ok(value)
}

// Scalar payloads are exactly one varint; anything left over means the
// caller's hint does not match what the server sent.
fn decode_whole_varint(buf: &[u8], hint: &TypeHint) -> Result<u64, CodecError> {
    let mut b = buf;
    let v = prost::encoding::decode_varint(&mut b)
        .map_err(|_| CodecError::Truncated(hint.kind()))?;
    if !b.is_empty() {
        return Err(CodecError::TrailingBytes(hint.kind()));
    }
    Ok(v)
}

fn check_len<'a>(buf: &'a [u8], want: usize, hint: &TypeHint) -> Result<&'a [u8], CodecError> {
    if buf.len() < want {
        return Err(CodecError::Truncated(hint.kind()));
    }
    if buf.len() > want {
        return Err(CodecError::TrailingBytes(hint.kind()));
    }
    Ok(buf)
}

fn decode_len_prefixed<'a>(buf: &'a [u8], hint: &TypeHint) -> Result<&'a [u8], CodecError> {
    let mut b = buf;
    let len = prost::encoding::decode_varint(&mut b)
        .map_err(|_| CodecError::Truncated(hint.kind()))? as usize;
    if b.len() < len {
        return Err(CodecError::Truncated(hint.kind()));
    }
    if b.len() > len {
        return Err(CodecError::TrailingBytes(hint.kind()));
    }
    Ok(b)
}
