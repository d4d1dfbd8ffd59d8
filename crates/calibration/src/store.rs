//! JSON baseline files under `<operators_dir>/baseline-json/<operator_id>/`

use crate::CalibrationError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sub-directory of the operators directory that holds baselines
pub const BASELINE_DIR: &str = "baseline-json";

#[derive(Debug, Clone)]
pub struct BaselineStore {
    root: PathBuf,
}

impl BaselineStore {
    /// Store rooted at `<operators_dir>/baseline-json`
    pub fn new(operators_dir: impl AsRef<Path>) -> Self {
        Self {
            root: operators_dir.as_ref().join(BASELINE_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn operator_dir(&self, operator_id: &str) -> Result<PathBuf, CalibrationError> {
        validate_operator_id(operator_id)?;
        Ok(self.root.join(operator_id))
    }

    pub fn path(&self, operator_id: &str, file: &str) -> Result<PathBuf, CalibrationError> {
        Ok(self.operator_dir(operator_id)?.join(file))
    }

    pub fn exists(&self, operator_id: &str, file: &str) -> bool {
        self.path(operator_id, file).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Write `value` as pretty JSON, creating the operator directory
    pub fn save<T: Serialize>(
        &self,
        operator_id: &str,
        file: &str,
        value: &T,
    ) -> Result<PathBuf, CalibrationError> {
        let dir = self.operator_dir(operator_id)?;
        fs::create_dir_all(&dir).map_err(|e| CalibrationError::Io(e.to_string()))?;
        let path = dir.join(file);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| CalibrationError::Serialization(e.to_string()))?;
        fs::write(&path, json).map_err(|e| CalibrationError::Io(e.to_string()))?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    /// Read a JSON file; `Ok(None)` when it does not exist
    pub fn load<T: DeserializeOwned>(
        &self,
        operator_id: &str,
        file: &str,
    ) -> Result<Option<T>, CalibrationError> {
        let path = self.path(operator_id, file)?;
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| CalibrationError::Io(e.to_string()))?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| CalibrationError::Serialization(format!("{}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    /// Like `load`, but an unreadable file is logged and treated as missing
    pub fn load_or_none<T: DeserializeOwned>(&self, operator_id: &str, file: &str) -> Option<T> {
        match self.load(operator_id, file) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring baseline {} for {}: {}", file, operator_id, e);
                None
            }
        }
    }

    /// Operators with at least one baseline directory
    pub fn list_operators(&self) -> Result<Vec<String>, CalibrationError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| CalibrationError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| CalibrationError::Io(e.to_string()))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Operator ids become directory names; reject anything that could escape the root.
pub fn validate_operator_id(operator_id: &str) -> Result<(), CalibrationError> {
    let bad = operator_id.is_empty()
        || operator_id == "."
        || operator_id.contains("..")
        || operator_id.contains('/')
        || operator_id.contains('\\');
    if bad {
        return Err(CalibrationError::InvalidOperatorId(operator_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;

    /// Fresh scratch directory under the system temp dir
    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("calibration-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: f64,
    }

    #[test]
    fn test_save_and_load() {
        let store = BaselineStore::new(scratch_dir("store"));
        assert!(store.load::<Sample>("op1", "x.json").unwrap().is_none());

        let path = store.save("op1", "x.json", &Sample { value: 1.5 }).unwrap();
        assert!(path.ends_with("baseline-json/op1/x.json"));
        assert!(store.exists("op1", "x.json"));
        assert_eq!(store.load::<Sample>("op1", "x.json").unwrap(), Some(Sample { value: 1.5 }));
        assert_eq!(store.list_operators().unwrap(), vec!["op1".to_string()]);
    }

    #[test]
    fn test_corrupt_file_is_none() {
        let store = BaselineStore::new(scratch_dir("corrupt"));
        let dir = store.operator_dir("op2").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("x.json"), "{not json").unwrap();
        assert!(store.load::<Sample>("op2", "x.json").is_err());
        assert!(store.load_or_none::<Sample>("op2", "x.json").is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let store = BaselineStore::new(scratch_dir("ids"));
        assert!(store.operator_dir("../etc").is_err());
        assert!(store.operator_dir("a/b").is_err());
        assert!(store.operator_dir("").is_err());
        assert!(store.operator_dir("12345678").is_ok());
    }
}
