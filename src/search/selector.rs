//! Best-model selection across a sweep

use tracing::info;

use super::registry::SummaryRegistry;
use crate::error::{Result, SearchError};
use crate::nas::network::SearchNetwork;
use crate::nas::sampler::ArchitectureSample;
use crate::tracking::storage::{ArtifactStore, EvaluationRecord};

/// The winning candidate, reloaded and fixed to its architecture
#[derive(Debug, Clone)]
pub struct BestModel<N> {
    pub network: N,
    pub architecture: ArchitectureSample,
    pub record: EvaluationRecord,
}

/// Record with the lowest held-out loss; ties go to the first, non-finite losses are skipped
pub fn find_best_record(records: &[EvaluationRecord]) -> Option<&EvaluationRecord> {
    let mut best: Option<&EvaluationRecord> = None;
    for record in records.iter().filter(|r| r.held_out_loss.is_finite()) {
        match best {
            Some(current) if record.held_out_loss >= current.held_out_loss => {}
            _ => best = Some(record),
        }
    }
    best
}

/// Select the best model over every table of the registry and reload it
pub fn select_best<N, S>(store: &S, registry: &SummaryRegistry) -> Result<BestModel<N>>
where
    N: SearchNetwork,
    S: ArtifactStore,
{
    let records = registry.records(store)?;
    let record = find_best_record(&records).cloned().ok_or(SearchError::NoCandidates)?;

    let mut network: N = store.load(&record.model_file)?;
    let architecture: ArchitectureSample = store.load(&record.architecture_file)?;
    if network.graph_size() != record.graph_size {
        return Err(SearchError::ArtifactError(format!(
            "model {} has graph size {}, summary says {}",
            record.model_file,
            network.graph_size(),
            record.graph_size
        )));
    }
    network.fix_architecture(true, Some(&architecture.to_weights()))?;

    info!(
        model = %record.model_file,
        graph_size = record.graph_size,
        held_out_loss = record.held_out_loss,
        candidates = records.len(),
        "Selected best model"
    );

    Ok(BestModel {
        network,
        architecture,
        record,
    })
}
