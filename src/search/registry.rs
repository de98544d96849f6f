//! Registry of the summary tables produced by one sweep

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tracking::storage::{ArtifactStore, EvaluationRecord};

/// Append-only list of summary tables, in the order configurations finished
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRegistry {
    tables: Vec<String>,
}

impl SummaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a summary table
    pub fn register(&mut self, table: impl Into<String>) {
        self.tables.push(table.into());
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every record of every registered table, in registration then row order
    pub fn records<S: ArtifactStore>(&self, store: &S) -> Result<Vec<EvaluationRecord>> {
        let mut records = Vec::new();
        for table in &self.tables {
            records.extend(store.read_table(table)?);
        }
        Ok(records)
    }
}
