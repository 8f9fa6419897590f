//! AMF0 value codec, the subset the RTMP command layer speaks:
//! number, boolean, string, object, null, undefined and ECMA array.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use shared::error::{Error, Result};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Ordered key/value properties.
    Object(Vec<(String, Amf0Value)>),
    EcmaArray(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => props
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            Amf0Value::Number(n) => {
                buf.put_u8(MARKER_NUMBER);
                buf.put_f64(*n);
            }
            Amf0Value::Boolean(b) => {
                buf.put_u8(MARKER_BOOLEAN);
                buf.put_u8(*b as u8);
            }
            Amf0Value::String(s) => {
                buf.put_u8(MARKER_STRING);
                put_utf8(buf, s);
            }
            Amf0Value::Object(props) => {
                buf.put_u8(MARKER_OBJECT);
                put_properties(buf, props);
            }
            Amf0Value::EcmaArray(props) => {
                buf.put_u8(MARKER_ECMA_ARRAY);
                buf.put_u32(props.len() as u32);
                put_properties(buf, props);
            }
            Amf0Value::Null => buf.put_u8(MARKER_NULL),
            Amf0Value::Undefined => buf.put_u8(MARKER_UNDEFINED),
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Amf0Value> {
        if !buf.has_remaining() {
            return Err(Error::Amf0Decode("empty buffer".into()));
        }
        let marker = buf.get_u8();
        match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(Error::Amf0Decode("short number".into()));
                }
                Ok(Amf0Value::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                if !buf.has_remaining() {
                    return Err(Error::Amf0Decode("short boolean".into()));
                }
                Ok(Amf0Value::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(Amf0Value::String(get_utf8(buf)?)),
            MARKER_OBJECT => Ok(Amf0Value::Object(get_properties(buf)?)),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(Error::Amf0Decode("short ecma array".into()));
                }
                buf.advance(4); // approximate count, terminated by object-end
                Ok(Amf0Value::EcmaArray(get_properties(buf)?))
            }
            MARKER_NULL => Ok(Amf0Value::Null),
            MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
            other => Err(Error::Amf0Decode(format!("marker {other} unsupported"))),
        }
    }
}

fn put_utf8(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_utf8(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(Error::Amf0Decode("short string size".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::Amf0Decode("short string data".into()));
    }
    let raw = buf.split_to(len);
    Ok(String::from_utf8(raw.to_vec())?)
}

fn put_properties(buf: &mut BytesMut, props: &[(String, Amf0Value)]) {
    for (key, value) in props {
        put_utf8(buf, key);
        value.encode_to(buf);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

fn get_properties(buf: &mut Bytes) -> Result<Vec<(String, Amf0Value)>> {
    let mut props = Vec::new();
    loop {
        let key = get_utf8(buf)?;
        if key.is_empty() {
            if !buf.has_remaining() {
                return Err(Error::Amf0Decode("missing object end".into()));
            }
            let marker = buf.get_u8();
            if marker != MARKER_OBJECT_END {
                return Err(Error::Amf0Decode(format!(
                    "expected object end, got {marker}"
                )));
            }
            return Ok(props);
        }
        props.push((key, Amf0Value::decode(buf)?));
    }
}

/// Encode a value list into one command payload.
pub fn encode_values(values: &[Amf0Value]) -> Bytes {
    let mut buf = BytesMut::new();
    for v in values {
        v.encode_to(&mut buf);
    }
    buf.freeze()
}

/// Decode every value in a command payload.
pub fn decode_values(mut buf: Bytes) -> Result<Vec<Amf0Value>> {
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(Amf0Value::decode(&mut buf)?);
    }
    Ok(values)
}
