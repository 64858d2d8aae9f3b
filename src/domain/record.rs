use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::domain::{EntityDescriptor, FieldKind};
use crate::error::ApiError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DATETIME_DISPLAY: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Identifier of one record of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Whether a record's identifier field holds this id.
    pub fn matches(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (RecordId::Int(id), FieldValue::Integer(v)) => id == v,
            (RecordId::Text(id), FieldValue::Text(v)) => id == v,
            _ => false,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{id}"),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

/// A typed scalar held by one record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// A timestamp that arrived with an explicit offset, kept as sent.
    ZonedDateTime(DateTime<FixedOffset>),
}

impl FieldValue {
    /// Parses a textual value as the given kind. Enum values are plain text here.
    pub fn parse_as(kind: FieldKind, raw: &str) -> Option<FieldValue> {
        let raw = raw.trim();
        match kind {
            FieldKind::Text | FieldKind::Enum => Some(FieldValue::Text(raw.to_string())),
            FieldKind::Integer => raw.parse().ok().map(FieldValue::Integer),
            FieldKind::Decimal => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(FieldValue::Decimal),
            FieldKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(FieldValue::Boolean(true)),
                "false" | "0" | "no" | "off" => Some(FieldValue::Boolean(false)),
                _ => None,
            },
            FieldKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(raw).map(|dt| dt.naive_utc().date()))
                .or_else(|| parse_naive_datetime(raw).map(|dt| dt.date()))
                .map(FieldValue::Date),
            FieldKind::DateTime => parse_datetime(raw)
                .map(FieldValue::ZonedDateTime)
                .or_else(|| parse_naive_datetime(raw).map(FieldValue::DateTime)),
        }
    }

    /// Decodes a JSON value as the given kind, accepting numbers sent as strings.
    pub fn from_json(kind: FieldKind, value: &Value) -> Option<FieldValue> {
        match value {
            Value::Null => Some(FieldValue::Null),
            Value::String(s) if matches!(kind, FieldKind::Text | FieldKind::Enum) => {
                Some(FieldValue::Text(s.clone()))
            }
            Value::String(s) => FieldValue::parse_as(kind, s),
            Value::Bool(b) => match kind {
                FieldKind::Boolean => Some(FieldValue::Boolean(*b)),
                FieldKind::Text => Some(FieldValue::Text(b.to_string())),
                _ => None,
            },
            Value::Number(n) => match kind {
                FieldKind::Integer => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(integral_f64))
                    .map(FieldValue::Integer),
                FieldKind::Decimal => n.as_f64().map(FieldValue::Decimal),
                FieldKind::Boolean => n.as_i64().and_then(|i| match i {
                    0 => Some(FieldValue::Boolean(false)),
                    1 => Some(FieldValue::Boolean(true)),
                    _ => None,
                }),
                FieldKind::Text | FieldKind::Enum => Some(FieldValue::Text(n.to_string())),
                FieldKind::Date | FieldKind::DateTime => None,
            },
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::Number((*i).into()),
            FieldValue::Decimal(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.format(DATETIME_DISPLAY).to_string()),
            FieldValue::ZonedDateTime(dt) => Value::String(rfc3339(dt)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Decimal(d) => write!(f, "{d}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_DISPLAY)),
            FieldValue::ZonedDateTime(dt) => f.write_str(&rfc3339(dt)),
        }
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

fn parse_naive_datetime(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn rfc3339(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, dt.offset().local_minus_utc() == 0)
}

/// Whole floats inside the i64 range, e.g. `42.0` from a numeric column.
fn integral_f64(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

/// One row of an entity, as typed field values keyed by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn id(&self, descriptor: &EntityDescriptor) -> Option<RecordId> {
        match self.fields.get(&descriptor.id_field)? {
            FieldValue::Integer(id) => Some(RecordId::Int(*id)),
            FieldValue::Text(id) => Some(RecordId::Text(id.clone())),
            _ => None,
        }
    }

    /// Whether `id_field` of this record holds `id`.
    pub fn has_id(&self, id_field: &str, id: &RecordId) -> bool {
        self.fields.get(id_field).is_some_and(|v| id.matches(v))
    }

    /// Overlays every field of `patch` onto this record.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in &patch.fields {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// Case-insensitive substring match across all stringified field values.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        needle.is_empty()
            || self
                .fields
                .values()
                .any(|v| v.to_string().to_lowercase().contains(&needle))
    }

    pub fn decode(descriptor: &EntityDescriptor, value: &Value) -> Result<Record, ApiError> {
        let Value::Object(object) = value else {
            return Err(ApiError::Decode(format!(
                "{}: expected an object, got {value}",
                descriptor.name
            )));
        };

        let mut record = Record::new();
        for (key, raw) in object {
            let Some(spec) = descriptor.field(key) else {
                debug!(entity = %descriptor.name, field = %key, "Ignoring unknown field");
                continue;
            };
            let value = FieldValue::from_json(spec.kind, raw).ok_or_else(|| {
                ApiError::Decode(format!(
                    "{}.{}: cannot read {raw} as {}",
                    descriptor.name, key, spec.kind
                ))
            })?;
            record.fields.insert(key.clone(), value);
        }
        Ok(record)
    }

    pub fn encode(&self) -> Value {
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(object)
    }
}
