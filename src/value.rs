//! LwM2M resource value kinds and conversions

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Data kinds a resource can declare in its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
    String,
    Boolean,
    Opaque,
    Time,
    ObjLink,
    /// Executable resources carry no value
    None,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Opaque => "opaque",
            Self::Time => "time",
            Self::ObjLink => "objlnk",
            Self::None => "none",
        })
    }
}

/// A typed resource value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Opaque(Vec<u8>),
    /// Seconds since the Unix epoch
    Time(i64),
    ObjLink { object: u16, instance: u16 },
}

impl Value {
    /// The kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Opaque(_) => ValueKind::Opaque,
            Self::Time(_) => ValueKind::Time,
            Self::ObjLink { .. } => ValueKind::ObjLink,
        }
    }

    /// Parse a text/plain representation into a value of the given kind
    ///
    /// Returns `None` when the text does not represent that kind.
    pub fn from_text(kind: ValueKind, text: &str) -> Option<Self> {
        let text = text.trim();
        match kind {
            ValueKind::Integer => text.parse().ok().map(Self::Integer),
            ValueKind::Time => text.parse().ok().map(Self::Time),
            ValueKind::Float => text.parse().ok().map(Self::Float),
            ValueKind::String => Some(Self::String(text.to_string())),
            ValueKind::Boolean => match text {
                "1" | "true" => Some(Self::Boolean(true)),
                "0" | "false" => Some(Self::Boolean(false)),
                _ => None,
            },
            ValueKind::Opaque => BASE64.decode(text).ok().map(Self::Opaque),
            ValueKind::ObjLink => {
                let (object, instance) = text.split_once(':')?;
                Some(Self::ObjLink {
                    object: object.parse().ok()?,
                    instance: instance.parse().ok()?,
                })
            }
            ValueKind::None => None,
        }
    }

    /// text/plain representation
    pub fn to_text(&self) -> String {
        match self {
            Self::Integer(v) | Self::Time(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Opaque(bytes) => BASE64.encode(bytes),
            Self::ObjLink { object, instance } => format!("{}:{}", object, instance),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opaque(bytes) => write!(f, "<{} bytes>", bytes.len()),
            other => f.write_str(&other.to_text()),
        }
    }
}

/// Current wall-clock time in seconds since the Unix epoch
pub fn unix_time_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
