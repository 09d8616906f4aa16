//! LwM2M TLV payload encoding
//!
//! Each entry is a type byte, an 8 or 16 bit identifier, an optional length
//! field and the value. The type byte carries:
//!
//! ```text
//!  7 6 | 5       | 4 3         | 2 1 0
//!  kind| id 16b  | length type | short length
//! ```
//!
//! Object instances and multiple resources nest further TLVs inside their
//! value.

use crate::error::{Lwm2mError, Result};
use crate::model::{Content, ResourceValue, Resources};
use crate::path::Path;
use crate::schema::{ObjectSchema, ResourceDef};
use crate::value::{Value, ValueKind};

const KIND_OBJECT_INSTANCE: u8 = 0b00;
const KIND_RESOURCE_INSTANCE: u8 = 0b01;
const KIND_MULTIPLE_RESOURCE: u8 = 0b10;
const KIND_RESOURCE: u8 = 0b11;

/// Largest length a 24-bit length field can express
const MAX_LENGTH: usize = 0xFF_FFFF;

/// One decoded TLV entry
#[derive(Debug, Clone, PartialEq)]
pub enum Tlv {
    ObjectInstance { id: u16, resources: Vec<Tlv> },
    MultipleResource { id: u16, instances: Vec<Tlv> },
    Resource { id: u16, value: Vec<u8> },
    ResourceInstance { id: u16, value: Vec<u8> },
}

impl Tlv {
    pub fn id(&self) -> u16 {
        match self {
            Self::ObjectInstance { id, .. }
            | Self::MultipleResource { id, .. }
            | Self::Resource { id, .. }
            | Self::ResourceInstance { id, .. } => *id,
        }
    }
}

/// Encode read content addressed by `path`
pub fn encode_content(path: &Path, content: &Content) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match content {
        Content::Value(value) => {
            let (kind, id) = match (path.resource_instance, path.resource) {
                (Some(ri), _) => (KIND_RESOURCE_INSTANCE, ri),
                (None, Some(r)) => (KIND_RESOURCE, r),
                (None, None) => return Err(Lwm2mError::Encode(format!("{} is not a resource", path))),
            };
            write_entry(&mut out, kind, id, &encode_value(value))?;
        }
        Content::Multiple(values) => {
            let id = path
                .resource
                .ok_or_else(|| Lwm2mError::Encode(format!("{} is not a resource", path)))?;
            write_multiple(&mut out, id, values)?;
        }
        Content::Instance(resources) => write_resources(&mut out, resources)?,
        Content::Object(instances) => {
            for (id, resources) in instances {
                let mut inner = Vec::new();
                write_resources(&mut inner, resources)?;
                write_entry(&mut out, KIND_OBJECT_INSTANCE, *id, &inner)?;
            }
        }
    }
    Ok(out)
}

fn write_resources(out: &mut Vec<u8>, resources: &Resources) -> Result<()> {
    for (id, value) in resources {
        match value {
            ResourceValue::Single(value) => {
                write_entry(out, KIND_RESOURCE, *id, &encode_value(value))?;
            }
            ResourceValue::Multiple(values) => write_multiple(out, *id, values)?,
        }
    }
    Ok(())
}

fn write_multiple(
    out: &mut Vec<u8>,
    id: u16,
    values: &std::collections::BTreeMap<u16, Value>,
) -> Result<()> {
    let mut inner = Vec::new();
    for (ri, value) in values {
        write_entry(&mut inner, KIND_RESOURCE_INSTANCE, *ri, &encode_value(value))?;
    }
    write_entry(out, KIND_MULTIPLE_RESOURCE, id, &inner)
}

fn write_entry(out: &mut Vec<u8>, kind: u8, id: u16, value: &[u8]) -> Result<()> {
    let len = value.len();
    if len > MAX_LENGTH {
        return Err(Lwm2mError::Encode(format!("TLV value of {} bytes", len)));
    }

    let mut header = kind << 6;
    if id > 0xFF {
        header |= 0x20;
    }
    let length_bytes: usize = match len {
        0..=7 => {
            header |= len as u8;
            0
        }
        8..=0xFF => {
            header |= 0b01 << 3;
            1
        }
        0x100..=0xFFFF => {
            header |= 0b10 << 3;
            2
        }
        _ => {
            header |= 0b11 << 3;
            3
        }
    };

    out.push(header);
    if id > 0xFF {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }
    let len_be = (len as u32).to_be_bytes();
    out.extend_from_slice(&len_be[4 - length_bytes..]);
    out.extend_from_slice(value);
    Ok(())
}

/// Encode a single value
pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::Integer(v) | Value::Time(v) => encode_integer(*v),
        Value::Float(v) => v.to_be_bytes().to_vec(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Boolean(b) => vec![u8::from(*b)],
        Value::Opaque(bytes) => bytes.clone(),
        Value::ObjLink { object, instance } => {
            let mut out = object.to_be_bytes().to_vec();
            out.extend_from_slice(&instance.to_be_bytes());
            out
        }
    }
}

/// Shortest of 1, 2, 4 or 8 big-endian bytes that holds the value
fn encode_integer(v: i64) -> Vec<u8> {
    if let Ok(v) = i8::try_from(v) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i16::try_from(v) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i32::try_from(v) {
        v.to_be_bytes().to_vec()
    } else {
        v.to_be_bytes().to_vec()
    }
}

/// Interpret raw TLV value bytes as the given kind
pub fn decode_value(kind: ValueKind, bytes: &[u8]) -> Option<Value> {
    match kind {
        ValueKind::Integer => decode_integer(bytes).map(Value::Integer),
        ValueKind::Time => decode_integer(bytes).map(Value::Time),
        ValueKind::Float => match bytes.len() {
            4 => Some(Value::Float(f64::from(f32::from_be_bytes(bytes.try_into().ok()?)))),
            8 => Some(Value::Float(f64::from_be_bytes(bytes.try_into().ok()?))),
            _ => None,
        },
        ValueKind::String => String::from_utf8(bytes.to_vec()).ok().map(Value::String),
        ValueKind::Boolean => match bytes {
            [0] => Some(Value::Boolean(false)),
            [1] => Some(Value::Boolean(true)),
            _ => None,
        },
        ValueKind::Opaque => Some(Value::Opaque(bytes.to_vec())),
        ValueKind::ObjLink => match bytes {
            [o1, o2, i1, i2] => Some(Value::ObjLink {
                object: u16::from_be_bytes([*o1, *o2]),
                instance: u16::from_be_bytes([*i1, *i2]),
            }),
            _ => None,
        },
        ValueKind::None => None,
    }
}

fn decode_integer(bytes: &[u8]) -> Option<i64> {
    match bytes.len() {
        1 => Some(i64::from(i8::from_be_bytes(bytes.try_into().ok()?))),
        2 => Some(i64::from(i16::from_be_bytes(bytes.try_into().ok()?))),
        4 => Some(i64::from(i32::from_be_bytes(bytes.try_into().ok()?))),
        8 => Some(i64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

/// Parse a TLV payload into its entries
pub fn parse(mut bytes: &[u8]) -> Result<Vec<Tlv>> {
    let mut entries = Vec::new();

    while let Some(&header) = bytes.first() {
        let id_len = if header & 0x20 != 0 { 2 } else { 1 };
        let id_bytes = take(bytes, 1, id_len)?;
        let id = match id_bytes {
            [b] => u16::from(*b),
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => return Err(truncated()),
        };

        let mut pos = 1 + id_len;
        let len = match (header >> 3) & 0b11 {
            0 => usize::from(header & 0b111),
            n => {
                let n = usize::from(n);
                let field = take(bytes, pos, n)?;
                pos += n;
                field.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
            }
        };
        let value = take(bytes, pos, len)?;

        let entry = match header >> 6 {
            KIND_OBJECT_INSTANCE => Tlv::ObjectInstance {
                id,
                resources: parse(value)?,
            },
            KIND_RESOURCE_INSTANCE => Tlv::ResourceInstance {
                id,
                value: value.to_vec(),
            },
            KIND_MULTIPLE_RESOURCE => Tlv::MultipleResource {
                id,
                instances: parse(value)?,
            },
            _ => Tlv::Resource {
                id,
                value: value.to_vec(),
            },
        };
        entries.push(entry);
        bytes = &bytes[pos + len..];
    }

    Ok(entries)
}

fn take(bytes: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    bytes.get(start..start + len).ok_or_else(truncated)
}

fn truncated() -> Lwm2mError {
    Lwm2mError::Decode("truncated TLV".into())
}

/// Decode a write payload into typed resources of one instance
///
/// `path` is the write target: an instance (payload lists its resources,
/// optionally wrapped in one object-instance entry) or a single resource.
pub fn decode_resources(schema: &ObjectSchema, path: &Path, payload: &[u8]) -> Result<Resources> {
    let mut entries = parse(payload)?;

    // Unwrap `[ObjectInstance { resources }]` sent for instance writes
    if matches!(entries.as_slice(), [Tlv::ObjectInstance { .. }]) {
        if let Some(Tlv::ObjectInstance { id, resources }) = entries.pop() {
            if Some(id) != path.instance {
                return Err(Lwm2mError::Decode(format!(
                    "object instance {} does not match {}",
                    id, path
                )));
            }
            entries = resources;
        }
    }

    let instance = path
        .instance
        .ok_or_else(|| Lwm2mError::InvalidPath(path.to_string()))?;
    let mut out = Resources::new();
    for entry in entries {
        let resource_path = Path::resource(path.object, instance, entry.id());
        if path.resource.is_some_and(|r| r != entry.id()) {
            return Err(Lwm2mError::Decode(format!(
                "resource {} does not match {}",
                entry.id(),
                path
            )));
        }
        let def = schema
            .resource(entry.id())
            .ok_or(Lwm2mError::ResourceNotFound(resource_path))?;
        out.insert(entry.id(), decode_resource(def, resource_path, entry)?);
    }
    Ok(out)
}

fn decode_resource(def: &ResourceDef, path: Path, entry: Tlv) -> Result<ResourceValue> {
    let typed = |bytes: &[u8]| {
        decode_value(def.kind, bytes).ok_or(Lwm2mError::TypeMismatch {
            path,
            expected: def.kind,
            actual: ValueKind::Opaque,
        })
    };

    match entry {
        Tlv::Resource { value, .. } => Ok(ResourceValue::Single(typed(&value)?)),
        Tlv::MultipleResource { instances, .. } => {
            let mut values = std::collections::BTreeMap::new();
            for instance in instances {
                match instance {
                    Tlv::ResourceInstance { id, value } => {
                        values.insert(id, typed(&value)?);
                    }
                    other => {
                        return Err(Lwm2mError::Decode(format!(
                            "unexpected entry {:?} in multiple resource",
                            other.id()
                        )));
                    }
                }
            }
            Ok(ResourceValue::Multiple(values))
        }
        other => Err(Lwm2mError::Decode(format!(
            "unexpected TLV entry for resource {}",
            other.id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resources;
    use std::collections::BTreeMap;

    #[test]
    fn test_single_resource_encoding() {
        let path = Path::resource(3, 0, 9);
        let bytes = encode_content(&path, &Content::Value(Value::Integer(87))).unwrap();
        // Resource, 8-bit id, inline length 1
        assert_eq!(hex::encode(&bytes), "c10957");
    }

    #[test]
    fn test_long_value_uses_length_field() {
        let path = Path::resource(3, 0, 0);
        let name = "Open Mobile Alliance";
        let bytes = encode_content(&path, &Content::Value(Value::from(name))).unwrap();
        assert_eq!(bytes[0], 0xc8);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(usize::from(bytes[2]), name.len());

        let entries = parse(&bytes).unwrap();
        assert_eq!(
            entries,
            vec![Tlv::Resource {
                id: 0,
                value: name.as_bytes().to_vec()
            }]
        );
    }

    #[test]
    fn test_sixteen_bit_ids() {
        let path = Path::resource(3303, 0, 5700);
        let bytes = encode_content(&path, &Content::Value(Value::Float(21.5))).unwrap();
        assert_eq!(&bytes[..3], &[0xe8, 0x16, 0x44]);
        assert_eq!(bytes[3], 8);
    }

    #[test]
    fn test_multiple_resource() {
        let path = Path::resource(3, 0, 11);
        let values = BTreeMap::from([(0, Value::Integer(1)), (1, Value::Integer(5))]);
        let bytes = encode_content(&path, &Content::Multiple(values)).unwrap();
        assert_eq!(hex::encode(&bytes), "860b41000141010105");
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(encode_integer(-1), vec![0xff]);
        assert_eq!(encode_integer(300), vec![0x01, 0x2c]);
        assert_eq!(encode_integer(70_000).len(), 4);
        assert_eq!(encode_integer(i64::MAX).len(), 8);
        assert_eq!(decode_integer(&[0xff, 0x38]), Some(-200));
        assert_eq!(decode_integer(&[1, 2, 3]), None);
    }

    #[test]
    fn test_decode_instance_write() {
        let schema = ObjectSchema::device();
        let path = Path::instance(3, 0);
        let content = Content::Instance(resources([
            (14, Value::from("+02:00")),
            (13, Value::Time(1_700_000_000)),
        ]));
        let bytes = encode_content(&path, &content).unwrap();

        let decoded = decode_resources(&schema, &path, &bytes).unwrap();
        assert_eq!(
            decoded.get(&13),
            Some(&ResourceValue::Single(Value::Time(1_700_000_000)))
        );
    }

    #[test]
    fn test_decode_wrapped_instance() {
        let schema = ObjectSchema::device();
        let object = Content::Object(BTreeMap::from([(
            0,
            resources([(15, Value::from("UTC"))]),
        )]));
        let bytes = encode_content(&Path::object(3), &object).unwrap();

        let decoded = decode_resources(&schema, &Path::instance(3, 0), &bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decode_resources(&schema, &Path::instance(3, 1), &bytes).is_err());
    }

    #[test]
    fn test_decode_wrong_width_is_type_mismatch() {
        let schema = ObjectSchema::device();
        // Three-byte integer for the Time resource 13
        let bytes = [0xc3, 0x0d, 0x01, 0x02, 0x03];
        let err = decode_resources(&schema, &Path::resource(3, 0, 13), &bytes).unwrap_err();
        assert!(matches!(err, Lwm2mError::TypeMismatch { .. }));
    }

    #[test]
    fn test_truncated_payload() {
        assert!(parse(&[0xc8, 0x00, 0x10, 0x41]).is_err());
        assert!(parse(&[0xe1]).is_err());
    }
}
