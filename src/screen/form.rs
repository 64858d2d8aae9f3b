use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{EntityDescriptor, FieldSpec, FieldValue, IdKind, Record};
use crate::error::FormError;

/// Raw string inputs of the create/edit form, validated into a typed
/// [`Record`] only when submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    descriptor: Arc<EntityDescriptor>,
    values: BTreeMap<String, String>,
    /// The record under edit and the inputs it was hydrated into.
    original: Option<(Record, BTreeMap<String, String>)>,
}

impl FormState {
    /// Empty form for a new record. Text identifiers are chosen by the user,
    /// so their input is part of the create form.
    pub fn blank(descriptor: Arc<EntityDescriptor>) -> Self {
        let values = descriptor
            .fields
            .iter()
            .filter(|f| f.name != descriptor.id_field || descriptor.id_kind == IdKind::Text)
            .map(|f| (f.name.clone(), String::new()))
            .collect();
        Self {
            descriptor,
            values,
            original: None,
        }
    }

    /// Form prefilled from the record under edit.
    pub fn from_record(descriptor: Arc<EntityDescriptor>, record: &Record) -> Self {
        let values: BTreeMap<String, String> = descriptor
            .editable_fields()
            .map(|f| {
                let raw = record.get(&f.name).map(FieldValue::to_string).unwrap_or_default();
                (f.name.clone(), raw)
            })
            .collect();
        Self {
            descriptor,
            original: Some((record.clone(), values.clone())),
            values,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn set(&mut self, field: &str, raw: impl Into<String>) -> Result<(), FormError> {
        match self.values.get_mut(field) {
            Some(slot) => {
                *slot = raw.into();
                Ok(())
            }
            None => Err(FormError::UnknownField(field.to_string())),
        }
    }

    /// Inputs in schema order.
    pub fn inputs(&self) -> impl Iterator<Item = (&FieldSpec, &str)> {
        self.descriptor
            .fields
            .iter()
            .filter_map(|f| self.values.get(&f.name).map(|raw| (f, raw.as_str())))
    }

    /// Unset optional fields are left out; the server applies its defaults.
    pub fn to_create_payload(&self) -> Result<Record, FormError> {
        let mut record = Record::new();
        for (spec, raw) in self.inputs() {
            if spec.name == self.descriptor.id_field {
                let id = self.descriptor.parse_id(raw)?;
                record.set(spec.name.clone(), FieldValue::Text(id.to_string()));
                continue;
            }
            if raw.trim().is_empty() {
                if spec.required {
                    return Err(required(spec));
                }
                continue;
            }
            record.set(spec.name.clone(), spec.parse_input(raw)?);
        }
        Ok(record)
    }

    /// The record under edit overlaid with the inputs the user changed.
    /// Untouched fields keep the server's value as fetched; a cleared
    /// optional field becomes null.
    pub fn to_update_payload(&self) -> Result<Record, FormError> {
        let mut record = Record::new();
        for (spec, raw) in self.inputs() {
            if spec.name == self.descriptor.id_field {
                continue;
            }
            if let Some((fetched, hydrated)) = &self.original {
                if hydrated.get(&spec.name).map(String::as_str) == Some(raw) {
                    if let Some(value) = fetched.get(&spec.name) {
                        record.set(spec.name.clone(), value.clone());
                    }
                    continue;
                }
            }
            let value = if raw.trim().is_empty() {
                if spec.required {
                    return Err(required(spec));
                }
                FieldValue::Null
            } else {
                spec.parse_input(raw)?
            };
            record.set(spec.name.clone(), value);
        }
        Ok(record)
    }
}

fn required(spec: &FieldSpec) -> FormError {
    FormError::Required {
        field: spec.name.clone(),
    }
}
