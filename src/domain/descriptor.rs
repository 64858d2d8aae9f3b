use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

use crate::domain::{FieldValue, RecordId};
use crate::error::{CatalogError, FormError};

/// Primitive kind of a single entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Enum,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date (YYYY-MM-DD)",
            FieldKind::DateTime => "datetime (YYYY-MM-DDTHH:MM:SS)",
            FieldKind::Enum => "one of the listed options",
        };
        f.write_str(name)
    }
}

/// Shape of an entity's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    #[default]
    Integer,
    Text,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

impl FieldSpec {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Parses raw form input. Callers decide what an empty input means.
    pub fn parse_input(&self, raw: &str) -> Result<FieldValue, FormError> {
        let raw = raw.trim();
        if self.kind == FieldKind::Enum && !self.options.iter().any(|o| o == raw) {
            return Err(FormError::NotAnOption {
                field: self.name.clone(),
                value: raw.to_string(),
                options: self.options.clone(),
            });
        }
        FieldValue::parse_as(self.kind, raw).ok_or_else(|| FormError::Invalid {
            field: self.name.clone(),
            expected: self.kind.to_string(),
            input: raw.to_string(),
        })
    }
}

/// Everything the generic CRUD stack needs to know about one table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub label: String,
    pub path: String,
    pub id_field: String,
    #[serde(default)]
    pub id_kind: IdKind,
    pub fields: Vec<FieldSpec>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields a form may edit; the identifier is server-assigned and immutable.
    pub fn editable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |f| f.name != self.id_field)
    }

    pub fn parse_id(&self, raw: &str) -> Result<RecordId, FormError> {
        let raw = raw.trim();
        match self.id_kind {
            IdKind::Integer => raw
                .parse::<i64>()
                .map(RecordId::Int)
                .map_err(|_| FormError::Invalid {
                    field: self.id_field.clone(),
                    expected: FieldKind::Integer.to_string(),
                    input: raw.to_string(),
                }),
            IdKind::Text if raw.is_empty() => Err(FormError::Required {
                field: self.id_field.clone(),
            }),
            IdKind::Text => Ok(RecordId::Text(raw.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |msg: String| Err(CatalogError::Invalid(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(CatalogError::Invalid("entity with empty name".into()));
        }
        if !self.path.starts_with('/') || self.path.len() < 2 {
            return invalid(format!("path {:?} must start with '/'", self.path));
        }
        let Some(id) = self.field(&self.id_field) else {
            return invalid(format!("id field {:?} missing from fields", self.id_field));
        };
        let id_matches = matches!(
            (self.id_kind, id.kind),
            (IdKind::Integer, FieldKind::Integer) | (IdKind::Text, FieldKind::Text)
        );
        if !id_matches {
            return invalid(format!("id field {:?} kind disagrees with id_kind", self.id_field));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return invalid(format!("duplicate field {:?}", field.name));
            }
            if field.kind == FieldKind::Enum && field.options.is_empty() {
                return invalid(format!("enum field {:?} has no options", field.name));
            }
        }
        Ok(())
    }
}
