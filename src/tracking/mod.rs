//! Persistence of search artifacts and evaluation summaries

pub mod storage;

pub use storage::{ArtifactStore, EvaluationRecord, LocalStorage, SUMMARY_HEADER};
