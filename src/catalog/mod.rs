//! The set of entity descriptors the console serves.
//!
//! A catalog is data, not code: the bundled `catalog.toml` describes every
//! table, and a deployment can swap in its own file without recompiling.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::EntityDescriptor;
use crate::error::CatalogError;

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntityDescriptor>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    entities: Vec<Arc<EntityDescriptor>>,
}

impl Catalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn from_toml(source: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(source).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_descriptors(file.entities)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        info!(path = %path.display(), "Loading entity catalog");
        let source = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&source)
    }

    pub fn from_descriptors(descriptors: Vec<EntityDescriptor>) -> Result<Self, CatalogError> {
        if descriptors.is_empty() {
            return Err(CatalogError::Invalid("catalog declares no entities".into()));
        }

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !names.insert(descriptor.name.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate entity name {:?}",
                    descriptor.name
                )));
            }
            if !paths.insert(descriptor.path.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate entity path {:?}",
                    descriptor.path
                )));
            }
        }

        debug!(entity_count = descriptors.len(), "Catalog validated");
        Ok(Self {
            entities: descriptors.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityDescriptor>, CatalogError> {
        self.entities
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownEntity(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
