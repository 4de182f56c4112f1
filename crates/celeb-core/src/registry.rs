//! Class registry: bidirectional class name ↔ index mapping.
//!
//! Loaded once from `class_dictionary.json` (a JSON object of name → index)
//! and shared read-only for the life of the process.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("class dictionary not found: {0}")]
    NotFound(String),
    #[error("failed to read class dictionary {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid class dictionary JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("class dictionary is empty")]
    Empty,
    #[error("class index {index} is assigned to both {first:?} and {second:?}")]
    DuplicateIndex {
        index: usize,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
    name_to_index: BTreeMap<String, usize>,
    index_to_name: BTreeMap<usize, String>,
}

impl ClassRegistry {
    /// Build a registry, rejecting mappings that cannot be inverted.
    pub fn from_map(name_to_index: BTreeMap<String, usize>) -> Result<Self, RegistryError> {
        if name_to_index.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut index_to_name = BTreeMap::new();
        for (name, &index) in &name_to_index {
            if let Some(first) = index_to_name.insert(index, name.clone()) {
                return Err(RegistryError::DuplicateIndex {
                    index,
                    first,
                    second: name.clone(),
                });
            }
        }

        Ok(Self {
            name_to_index,
            index_to_name,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let map: BTreeMap<String, usize> = serde_json::from_str(json)?;
        Self::from_map(map)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::NotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            classes = registry.len(),
            "loaded class dictionary"
        );
        Ok(registry)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.index_to_name.get(&index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.name_to_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_index.is_empty()
    }

    /// Class names in index order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index_to_name.values().map(String::as_str)
    }

    pub fn name_to_index(&self) -> &BTreeMap<String, usize> {
        &self.name_to_index
    }
}

impl Serialize for ClassRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.name_to_index.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "lionel_messi": 0,
        "maria_sharapova": 1,
        "roger_federer": 2,
        "serena_williams": 3,
        "virat_kohli": 4
    }"#;

    #[test]
    fn test_inversion_is_bijective() {
        let registry = ClassRegistry::from_json(SAMPLE).unwrap();
        assert_eq!(registry.len(), 5);
        for (name, &index) in registry.name_to_index() {
            assert_eq!(registry.name_of(index), Some(name.as_str()));
            assert_eq!(registry.index_of(name), Some(index));
        }
    }

    #[test]
    fn test_names_in_index_order() {
        let json = r#"{"b": 1, "a": 2, "c": 0}"#;
        let registry = ClassRegistry::from_json(json).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let json = r#"{"a": 0, "b": 0}"#;
        let err = ClassRegistry::from_json(json).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIndex { index: 0, .. }));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            ClassRegistry::from_json("{}"),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_negative_index_is_json_error() {
        assert!(matches!(
            ClassRegistry::from_json(r#"{"a": -1}"#),
            Err(RegistryError::Json(_))
        ));
    }

    #[test]
    fn test_serializes_as_name_to_index() {
        let registry = ClassRegistry::from_json(SAMPLE).unwrap();
        let value = serde_json::to_value(&registry).unwrap();
        assert_eq!(value["virat_kohli"], 4);
        assert_eq!(value.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClassRegistry::load(Path::new("/nonexistent/class_dictionary.json")).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_dictionary.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let registry = ClassRegistry::load(&path).unwrap();
        assert_eq!(registry.name_of(2), Some("roger_federer"));
    }
}
