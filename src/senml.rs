//! SenML payloads (RFC 8428) in JSON (110) and CBOR (112)
//!
//! Records are resolved against the base name, so `{"bn":"/3/0/","n":"9"}`
//! addresses `/3/0/9`. CBOR uses the integer labels of RFC 8428 section 6
//! plus the LwM2M `vlo` text label for object links.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL};
use ciborium::Value as Cbor;
use serde::{Deserialize, Serialize};

use crate::error::{Lwm2mError, Result};
use crate::model::{Content, ResourceValue, Resources};
use crate::path::Path;
use crate::schema::ObjectSchema;
use crate::value::{Value, ValueKind};

// CBOR labels
const BASE_NAME: i64 = -2;
const NAME: i64 = 0;
const VALUE: i64 = 2;
const STRING_VALUE: i64 = 3;
const BOOL_VALUE: i64 = 4;
const TIME: i64 = 6;
const DATA_VALUE: i64 = 8;
const OBJLNK_VALUE: &str = "vlo";

/// Value field of one record
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Data(Vec<u8>),
    ObjLink(String),
}

impl Field {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Integer(v) | Value::Time(v) => Self::Int(*v),
            Value::Float(v) => Self::Float(*v),
            Value::String(s) => Self::Text(s.clone()),
            Value::Boolean(b) => Self::Bool(*b),
            Value::Opaque(bytes) => Self::Data(bytes.clone()),
            link @ Value::ObjLink { .. } => Self::ObjLink(link.to_text()),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::String,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Data(_) => ValueKind::Opaque,
            Self::ObjLink(_) => ValueKind::ObjLink,
        }
    }

    /// Interpret the field as a value of the given kind
    fn into_value(self, kind: ValueKind) -> Option<Value> {
        match (kind, self) {
            (ValueKind::Integer, Self::Int(v)) => Some(Value::Integer(v)),
            (ValueKind::Integer, Self::Float(v)) if v.fract() == 0.0 => {
                Some(Value::Integer(v as i64))
            }
            (ValueKind::Time, Self::Int(v)) => Some(Value::Time(v)),
            (ValueKind::Time, Self::Float(v)) => Some(Value::Time(v as i64)),
            (ValueKind::Float, Self::Float(v)) => Some(Value::Float(v)),
            (ValueKind::Float, Self::Int(v)) => Some(Value::Float(v as f64)),
            (ValueKind::String, Self::Text(s)) => Some(Value::String(s)),
            (ValueKind::Boolean, Self::Bool(b)) => Some(Value::Boolean(b)),
            (ValueKind::Opaque, Self::Data(bytes)) => Some(Value::Opaque(bytes)),
            (ValueKind::ObjLink, Self::ObjLink(link)) => Value::from_text(ValueKind::ObjLink, &link),
            _ => None,
        }
    }
}

/// A record with its name resolved against the base name
#[derive(Debug, Clone, PartialEq)]
struct Record {
    name: String,
    time: Option<f64>,
    field: Option<Field>,
}

/// JSON representation of one SenML record
#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    bn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<serde_json::Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vlo: Option<String>,
}

/// Flatten read content into (path, value) leaves
fn leaves(path: &Path, content: &Content) -> Result<Vec<(Path, Value)>> {
    let instance_leaves = |object: u16, instance: u16, resources: &Resources| {
        let mut out = Vec::new();
        for (id, value) in resources {
            match value {
                ResourceValue::Single(v) => out.push((Path::resource(object, instance, *id), v.clone())),
                ResourceValue::Multiple(values) => out.extend(values.iter().map(|(ri, v)| {
                    (Path::resource_instance(object, instance, *id, *ri), v.clone())
                })),
            }
        }
        out
    };

    let not_addressable = || Lwm2mError::Encode(format!("content does not match {}", path));
    Ok(match content {
        Content::Value(value) => vec![(*path, value.clone())],
        Content::Multiple(values) => {
            let (instance, resource) = path.instance.zip(path.resource).ok_or_else(not_addressable)?;
            values
                .iter()
                .map(|(ri, v)| (Path::resource_instance(path.object, instance, resource, *ri), v.clone()))
                .collect()
        }
        Content::Instance(resources) => {
            let instance = path.instance.ok_or_else(not_addressable)?;
            instance_leaves(path.object, instance, resources)
        }
        Content::Object(instances) => instances
            .iter()
            .flat_map(|(instance, resources)| instance_leaves(path.object, *instance, resources))
            .collect(),
    })
}

/// Build records with the request path as base name
fn to_records(path: &Path, content: &Content) -> Result<Vec<(Option<String>, Record)>> {
    let base = match content {
        Content::Value(_) => path.to_string(),
        _ => format!("{}/", path),
    };

    Ok(leaves(path, content)?
        .into_iter()
        .enumerate()
        .map(|(i, (leaf, value))| {
            let full = leaf.to_string();
            let relative = full.strip_prefix(base.as_str()).unwrap_or(&full).to_string();
            let record = Record {
                name: relative,
                time: None,
                field: Some(Field::from_value(&value)),
            };
            ((i == 0).then(|| base.clone()), record)
        })
        .collect())
}

/// Encode read content as SenML-JSON
pub fn encode_json(path: &Path, content: &Content) -> Result<Vec<u8>> {
    let mut records = Vec::new();
    for (bn, record) in to_records(path, content)? {
        let mut json = JsonRecord {
            bn,
            n: (!record.name.is_empty()).then_some(record.name),
            t: record.time,
            ..Default::default()
        };
        match record.field {
            Some(Field::Int(v)) => json.v = Some(v.into()),
            Some(Field::Float(v)) => {
                json.v = Some(
                    serde_json::Number::from_f64(v)
                        .ok_or_else(|| Lwm2mError::Encode(format!("{} is not a JSON number", v)))?,
                );
            }
            Some(Field::Text(s)) => json.vs = Some(s),
            Some(Field::Bool(b)) => json.vb = Some(b),
            Some(Field::Data(bytes)) => json.vd = Some(BASE64URL.encode(bytes)),
            Some(Field::ObjLink(link)) => json.vlo = Some(link),
            None => {}
        }
        records.push(json);
    }
    serde_json::to_vec(&records).map_err(|e| Lwm2mError::Encode(e.to_string()))
}

/// Encode read content as SenML-CBOR
pub fn encode_cbor(path: &Path, content: &Content) -> Result<Vec<u8>> {
    let mut records = Vec::new();
    for (bn, record) in to_records(path, content)? {
        let mut map = Vec::new();
        if let Some(bn) = bn {
            map.push((Cbor::Integer(BASE_NAME.into()), Cbor::Text(bn)));
        }
        if !record.name.is_empty() {
            map.push((Cbor::Integer(NAME.into()), Cbor::Text(record.name)));
        }
        if let Some(t) = record.time {
            map.push((Cbor::Integer(TIME.into()), Cbor::Float(t)));
        }
        match record.field {
            Some(Field::Int(v)) => map.push((Cbor::Integer(VALUE.into()), Cbor::Integer(v.into()))),
            Some(Field::Float(v)) => map.push((Cbor::Integer(VALUE.into()), Cbor::Float(v))),
            Some(Field::Text(s)) => map.push((Cbor::Integer(STRING_VALUE.into()), Cbor::Text(s))),
            Some(Field::Bool(b)) => map.push((Cbor::Integer(BOOL_VALUE.into()), Cbor::Bool(b))),
            Some(Field::Data(bytes)) => map.push((Cbor::Integer(DATA_VALUE.into()), Cbor::Bytes(bytes))),
            Some(Field::ObjLink(link)) => {
                map.push((Cbor::Text(OBJLNK_VALUE.to_string()), Cbor::Text(link)))
            }
            None => {}
        }
        records.push(Cbor::Map(map));
    }

    let mut out = Vec::new();
    ciborium::into_writer(&Cbor::Array(records), &mut out)
        .map_err(|e| Lwm2mError::Encode(e.to_string()))?;
    Ok(out)
}

fn parse_json(payload: &[u8]) -> Result<Vec<Record>> {
    let raw: Vec<JsonRecord> =
        serde_json::from_slice(payload).map_err(|e| Lwm2mError::Decode(e.to_string()))?;

    let mut base = String::new();
    let mut records = Vec::with_capacity(raw.len());
    for json in raw {
        if let Some(bn) = json.bn {
            base = bn;
        }
        let field = if let Some(v) = json.v {
            Some(match v.as_i64() {
                Some(i) => Field::Int(i),
                None => Field::Float(v.as_f64().unwrap_or(f64::NAN)),
            })
        } else if let Some(s) = json.vs {
            Some(Field::Text(s))
        } else if let Some(b) = json.vb {
            Some(Field::Bool(b))
        } else if let Some(d) = json.vd {
            let bytes = BASE64URL
                .decode(d.trim_end_matches('='))
                .map_err(|e| Lwm2mError::Decode(format!("vd: {}", e)))?;
            Some(Field::Data(bytes))
        } else {
            json.vlo.map(Field::ObjLink)
        };
        records.push(Record {
            name: format!("{}{}", base, json.n.unwrap_or_default()),
            time: json.t,
            field,
        });
    }
    Ok(records)
}

fn parse_cbor(payload: &[u8]) -> Result<Vec<Record>> {
    let raw: Cbor =
        ciborium::from_reader(payload).map_err(|e| Lwm2mError::Decode(e.to_string()))?;
    let Cbor::Array(items) = raw else {
        return Err(Lwm2mError::Decode("SenML-CBOR pack is not an array".into()));
    };

    let mut base = String::new();
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let Cbor::Map(entries) = item else {
            return Err(Lwm2mError::Decode("SenML-CBOR record is not a map".into()));
        };
        let mut name = String::new();
        let mut time = None;
        let mut field = None;
        for (key, value) in entries {
            let label = match &key {
                Cbor::Integer(i) => i64::try_from(*i).ok(),
                Cbor::Text(t) if t == OBJLNK_VALUE => {
                    if let Cbor::Text(link) = value {
                        field = Some(Field::ObjLink(link));
                    }
                    continue;
                }
                _ => None,
            };
            match (label, value) {
                (Some(BASE_NAME), Cbor::Text(bn)) => base = bn,
                (Some(NAME), Cbor::Text(n)) => name = n,
                (Some(TIME), Cbor::Integer(t)) => time = i64::try_from(t).ok().map(|t| t as f64),
                (Some(TIME), Cbor::Float(t)) => time = Some(t),
                (Some(VALUE), Cbor::Integer(v)) => {
                    let v = i64::try_from(v)
                        .map_err(|_| Lwm2mError::Decode("integer out of range".into()))?;
                    field = Some(Field::Int(v));
                }
                (Some(VALUE), Cbor::Float(v)) => field = Some(Field::Float(v)),
                (Some(STRING_VALUE), Cbor::Text(s)) => field = Some(Field::Text(s)),
                (Some(BOOL_VALUE), Cbor::Bool(b)) => field = Some(Field::Bool(b)),
                (Some(DATA_VALUE), Cbor::Bytes(bytes)) => field = Some(Field::Data(bytes)),
                _ => {}
            }
        }
        records.push(Record {
            name: format!("{}{}", base, name),
            time,
            field,
        });
    }
    Ok(records)
}

/// Decode a SenML-JSON write payload into typed resources of one instance
pub fn decode_json(schema: &ObjectSchema, path: &Path, payload: &[u8]) -> Result<Resources> {
    into_resources(schema, path, parse_json(payload)?)
}

/// Decode a SenML-CBOR write payload into typed resources of one instance
pub fn decode_cbor(schema: &ObjectSchema, path: &Path, payload: &[u8]) -> Result<Resources> {
    into_resources(schema, path, parse_cbor(payload)?)
}

fn into_resources(schema: &ObjectSchema, target: &Path, records: Vec<Record>) -> Result<Resources> {
    let mut out = Resources::new();
    for record in records {
        let path: Path = record.name.parse()?;
        if !target.contains(&path) || path.instance.is_none() {
            return Err(Lwm2mError::Decode(format!(
                "record {} is outside {}",
                record.name, target
            )));
        }
        let Some(resource) = path.resource else {
            return Err(Lwm2mError::InvalidPath(record.name));
        };
        let def = schema
            .resource(resource)
            .ok_or(Lwm2mError::ResourceNotFound(path))?;
        let field = record
            .field
            .ok_or_else(|| Lwm2mError::Decode(format!("record {} has no value", path)))?;
        let actual = field.kind();
        let value = field.into_value(def.kind).ok_or(Lwm2mError::TypeMismatch {
            path,
            expected: def.kind,
            actual,
        })?;

        match path.resource_instance {
            None => {
                out.insert(resource, ResourceValue::Single(value));
            }
            Some(ri) => {
                let slot = out
                    .entry(resource)
                    .or_insert_with(|| ResourceValue::Multiple(BTreeMap::new()));
                if let ResourceValue::Multiple(values) = slot {
                    values.insert(ri, value);
                }
            }
        }
    }
    Ok(out)
}
