//! Known operators and their reference embeddings

use crate::{AuthError, FaceEmbedding};
use calibration::store::validate_operator_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Operator information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub embeddings: Vec<FaceEmbedding>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    operators: Vec<Operator>,
}

/// Operator database backed by a single JSON file
#[derive(Debug)]
pub struct OperatorRegistry {
    path: PathBuf,
    operators: Vec<Operator>,
}

impl OperatorRegistry {
    /// Empty registry that will be written to `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            operators: Vec::new(),
        }
    }

    /// Load the registry; a missing file yields an empty registry
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Encodings file {} not found, no operators loaded", path.display());
            return Ok(Self::new(path));
        }
        let text = fs::read_to_string(path).map_err(|e| AuthError::Database(e.to_string()))?;
        let file: RegistryFile =
            serde_json::from_str(&text).map_err(|e| AuthError::Database(e.to_string()))?;
        info!("Loaded {} operators from {}", file.operators.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            operators: file.operators,
        })
    }

    pub fn save(&self) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AuthError::Database(e.to_string()))?;
        }
        let file = RegistryFile {
            operators: self.operators.clone(),
        };
        let text = serde_json::to_string_pretty(&file).map_err(|e| AuthError::Database(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| AuthError::Database(e.to_string()))
    }

    /// Register an operator, or add embeddings to an existing one
    pub fn enroll(&mut self, id: &str, name: &str, embeddings: Vec<FaceEmbedding>) -> Result<(), AuthError> {
        validate_operator_id(id).map_err(|e| AuthError::Database(e.to_string()))?;
        if embeddings.is_empty() {
            return Err(AuthError::NoFace);
        }
        match self.operators.iter_mut().find(|o| o.id == id) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.embeddings.extend(embeddings);
                info!("Updated operator {} ({} embeddings)", id, existing.embeddings.len());
            }
            None => {
                info!("Enrolled operator {} ({})", id, name);
                self.operators.push(Operator {
                    id: id.to_string(),
                    name: name.to_string(),
                    embeddings,
                    registered_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Operator, AuthError> {
        let pos = self
            .operators
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| AuthError::NotEnrolled(id.to_string()))?;
        Ok(self.operators.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&Operator> {
        self.operators.iter().find(|o| o.id == id)
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{axis, scratch_dir};

    #[test]
    fn test_missing_file_is_empty() {
        let registry = OperatorRegistry::load(scratch_dir("missing").join("encodings.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let path = scratch_dir("reload").join("operators/encodings.json");
        let mut registry = OperatorRegistry::new(&path);
        registry.enroll("OP001", "Ana", vec![axis(0, 0, 0.0)]).unwrap();
        registry.enroll("OP002", "Luis", vec![axis(1, 1, 0.0)]).unwrap();
        registry.enroll("OP001", "Ana M.", vec![axis(0, 2, 0.1)]).unwrap();
        registry.save().unwrap();

        let loaded = OperatorRegistry::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let ana = loaded.get("OP001").unwrap();
        assert_eq!(ana.name, "Ana M.");
        assert_eq!(ana.embeddings.len(), 2);
    }

    #[test]
    fn test_enroll_validation() {
        let mut registry = OperatorRegistry::new(scratch_dir("invalid").join("e.json"));
        assert!(registry.enroll("../etc", "x", vec![axis(0, 0, 0.0)]).is_err());
        assert!(matches!(registry.enroll("OP1", "x", vec![]), Err(AuthError::NoFace)));
        assert!(matches!(registry.remove("OP9"), Err(AuthError::NotEnrolled(_))));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let path = scratch_dir("corrupt").join("encodings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(OperatorRegistry::load(&path), Err(AuthError::Database(_))));
    }
}
