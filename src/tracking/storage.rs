//! Artifact storage for search runs
//!
//! Persists networks and architectures as JSON artifacts and evaluation
//! summaries as CSV tables.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SearchError};

/// Column names of a summary table
pub const SUMMARY_HEADER: [&str; 4] = ["model_file", "architecture_file", "graph_size", "held_out_loss"];

/// One evaluated candidate model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Artifact name of the trained model
    pub model_file: String,
    /// Artifact name of its discrete architecture
    pub architecture_file: String,
    pub graph_size: usize,
    pub held_out_loss: f64,
}

/// Storage backend trait
pub trait ArtifactStore {
    /// Save an artifact under `name`, replacing any previous one
    fn save<T: Serialize>(&self, name: &str, artifact: &T) -> Result<()>;

    /// Load the artifact stored under `name`
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T>;

    /// Whether an artifact exists under `name`
    fn contains(&self, name: &str) -> bool;

    /// Create an empty summary table, truncating an existing one
    fn create_table(&self, table: &str) -> Result<()>;

    /// Append one record to a summary table
    fn append_row(&self, table: &str, record: &EvaluationRecord) -> Result<()>;

    /// Every record of a summary table, in insertion order
    fn read_table(&self, table: &str) -> Result<Vec<EvaluationRecord>>;
}

/// Local file system storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(format!("{}.json", checked_name(name)?)))
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(format!("{}.csv", checked_name(table)?)))
    }
}

/// Names are plain file stems inside the storage directory
fn checked_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SearchError::ArtifactError(format!("invalid artifact name '{}'", name)));
    }
    Ok(name)
}

impl ArtifactStore for LocalStorage {
    fn save<T: Serialize>(&self, name: &str, artifact: &T) -> Result<()> {
        let path = self.artifact_path(name)?;
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, artifact)?;
        writer.flush()?;
        debug!(path = %path.display(), "Saved artifact");
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.artifact_path(name)?;
        let file = File::open(&path)
            .map_err(|e| SearchError::ArtifactError(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn contains(&self, name: &str) -> bool {
        self.artifact_path(name).map(|p| p.exists()).unwrap_or(false)
    }

    fn create_table(&self, table: &str) -> Result<()> {
        let path = self.table_path(table)?;
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(SUMMARY_HEADER)?;
        writer.flush()?;
        Ok(())
    }

    fn append_row(&self, table: &str, record: &EvaluationRecord) -> Result<()> {
        let path = self.table_path(table)?;
        if !path.exists() {
            return Err(SearchError::ArtifactError(format!(
                "summary table {} does not exist",
                path.display()
            )));
        }
        let file = OpenOptions::new().append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    fn read_table(&self, table: &str) -> Result<Vec<EvaluationRecord>> {
        let path = self.table_path(table)?;
        let mut reader = csv::Reader::from_path(&path)?;
        let mut records = Vec::new();
        for row in reader.deserialize::<EvaluationRecord>() {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(loss: f64) -> EvaluationRecord {
        EvaluationRecord {
            model_file: "model_sample0".to_string(),
            architecture_file: "architecture_sample0".to_string(),
            graph_size: 2,
            held_out_loss: loss,
        }
    }

    #[test]
    fn test_artifact_save_load() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage.save("weights", &vec![1.0, 2.5]).unwrap();
        assert!(storage.contains("weights"));
        let loaded: Vec<f64> = storage.load("weights").unwrap();
        assert_eq!(loaded, vec![1.0, 2.5]);

        assert!(!storage.contains("missing"));
        assert!(matches!(storage.load::<Vec<f64>>("missing"), Err(SearchError::ArtifactError(_))));
    }

    #[test]
    fn test_table_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage.create_table("summary").unwrap();
        assert!(storage.read_table("summary").unwrap().is_empty());

        storage.append_row("summary", &record(0.5)).unwrap();
        storage.append_row("summary", &record(0.25)).unwrap();
        let rows = storage.read_table("summary").unwrap();
        assert_eq!(rows, vec![record(0.5), record(0.25)]);

        let text = fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert!(text.starts_with("model_file,architecture_file,graph_size,held_out_loss"));
    }

    #[test]
    fn test_append_requires_table() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage.append_row("nope", &record(1.0)).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage.save("../escape", &1).is_err());
        assert!(storage.create_table("").is_err());
    }
}
