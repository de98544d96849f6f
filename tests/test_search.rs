//! Integration test: meta-search end-to-end

use std::collections::HashSet;

use darts_search::nas::{ArchitectureSampler, DartsArchitect, MixedOpNetworkBuilder, NetworkFactory, Primitive, SearchNetwork};
use darts_search::search::{find_best_record, CandidateInit, MetaSearch, SearchConfig, SummaryRegistry};
use darts_search::tracking::{ArtifactStore, EvaluationRecord, LocalStorage};
use darts_search::training::{bilevel_step, Criterion, Sgd, StepSettings};
use darts_search::batch::DataQueue;
use darts_search::utils::Dataset;
use darts_search::SearchError;
use ndarray::Array2;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use tempfile::tempdir;

fn linear_dataset(n: usize) -> Dataset {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 3)) % 17) as f64 / 8.0 - 1.0);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| 0.7 * x[[i, 0]] - 0.3 * x[[i, 1]] + 0.1);
    Dataset::new(x, y).unwrap()
}

fn small_config(search_id: &str) -> SearchConfig {
    let mut config = SearchConfig::default()
        .with_search_id(search_id)
        .with_primitives(&["none", "add", "subtract", "mult"])
        .with_grid(vec![1e-3], vec![1], vec![0])
        .with_epochs(2)
        .with_n_samples(1);
    config.training.batch_size = 16;
    config.training.param_updates = 3;
    config
}

fn factory(config: &SearchConfig) -> MixedOpNetworkBuilder {
    MixedOpNetworkBuilder::new(2, 1, config.primitive_set().unwrap())
        .with_classifier_weight_decay(config.training.classifier_weight_decay)
}

#[test]
fn test_single_configuration_end_to_end() {
    let dir = tempdir().unwrap();
    let config = small_config("e2e");
    let mut search = MetaSearch::new(config.clone(), factory(&config), LocalStorage::new(dir.path()).unwrap()).unwrap();

    let report = search.run(&linear_dataset(40)).unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.registry.len(), 1);

    let records = report.registry.records(search.store()).unwrap();
    assert_eq!(records.len(), 1);

    let best = search.select_best(&report.registry).unwrap();
    assert_eq!(best.record, records[0]);
    assert!(best.network.is_architecture_fixed());
    assert_eq!(best.architecture.to_weights(), *best.network.architecture_weights());
}

#[test]
fn test_same_seed_is_reproducible() {
    let data = linear_dataset(40);
    let mut losses = Vec::new();
    for run in 0..2 {
        let dir = tempdir().unwrap();
        let mut config = small_config(&format!("repro{}", run));
        config.evaluation.n_samples = 3;
        config.evaluation.init = CandidateInit::ColdStart;
        let mut search = MetaSearch::new(config.clone(), factory(&config), LocalStorage::new(dir.path()).unwrap()).unwrap();
        let report = search.run(&data).unwrap();
        let run_losses: Vec<f64> = report
            .registry
            .records(search.store())
            .unwrap()
            .iter()
            .map(|r| r.held_out_loss)
            .collect();
        losses.push(run_losses);
    }
    assert_eq!(losses[0].len(), 3);
    assert_eq!(losses[0], losses[1]);
}

#[test]
fn test_selector_picks_global_minimum() {
    let dir = tempdir().unwrap();
    let store = LocalStorage::new(dir.path()).unwrap();
    let mut registry = SummaryRegistry::new();

    for (table, losses) in [("first", vec![0.8]), ("second", vec![0.3, 0.5])] {
        store.create_table(table).unwrap();
        for (i, loss) in losses.into_iter().enumerate() {
            store
                .append_row(
                    table,
                    &EvaluationRecord {
                        model_file: format!("{}_{}", table, i),
                        architecture_file: format!("{}_{}_arch", table, i),
                        graph_size: 1,
                        held_out_loss: loss,
                    },
                )
                .unwrap();
        }
        registry.register(table);
    }

    let records = registry.records(&store).unwrap();
    let best = find_best_record(&records).unwrap();
    assert_eq!(best.held_out_loss, 0.3);
    assert_eq!(best.model_file, "second_0");
}

#[test]
fn test_empty_registry_has_no_candidates() {
    let dir = tempdir().unwrap();
    let config = small_config("empty");
    let search = MetaSearch::new(config.clone(), factory(&config), LocalStorage::new(dir.path()).unwrap()).unwrap();
    let result = search.select_best(&SummaryRegistry::new());
    assert!(matches!(result, Err(SearchError::NoCandidates)));
}

#[test]
fn test_architecture_round_leaves_weights() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
    let config = small_config("order");
    let mut net = factory(&config).build(2, &mut rng).unwrap();
    let data = linear_dataset(32);
    let queue = DataQueue::new(data, 8).unwrap();
    let params = net.params();
    let alphas = net.architecture_weights().clone();

    let mut architect = DartsArchitect::new(3e-3, 1e-4, 1e-3);
    let mut opt = Sgd::new(0.025, 0.9, 3e-4);
    let settings = StepSettings {
        arch_updates: 1,
        param_updates: 0,
        grad_clip: 5.0,
        unrolled: true,
        report_freq: 1,
    };
    bilevel_step(
        &mut net,
        Some(&mut architect),
        &queue,
        &queue,
        Criterion::MeanSquaredError,
        &mut opt,
        0.025,
        &settings,
        &mut rng,
    )
    .unwrap();

    assert_ne!(net.architecture_weights(), &alphas);
    assert_eq!(net.params(), params);
}

#[test]
fn test_output_decay_shrinks_output_layer() {
    let data = linear_dataset(32);
    let queue = DataQueue::new(data, 32).unwrap();
    let settings = StepSettings {
        arch_updates: 1,
        param_updates: 1,
        grad_clip: 5.0,
        unrolled: false,
        report_freq: 10,
    };

    let mut norms = Vec::new();
    for decay in [0.0, 0.5] {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mut net = MixedOpNetworkBuilder::new(2, 1, vec![Primitive::Add, Primitive::Mult])
            .with_classifier_weight_decay(decay)
            .build(1, &mut rng)
            .unwrap();
        let mut opt = Sgd::new(0.1, 0.0, 0.0);
        bilevel_step(
            &mut net,
            None::<&mut DartsArchitect>,
            &queue,
            &queue,
            Criterion::MeanSquaredError,
            &mut opt,
            0.1,
            &settings,
            &mut rng,
        )
        .unwrap();
        norms.push(net.output_layer_norm());
    }

    assert!(norms[1] < norms[0]);
}

#[test]
fn test_unique_samples_from_trained_weights() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let config = small_config("unique");
    let net = factory(&config).build(2, &mut rng).unwrap();
    let sampler = ArchitectureSampler::new(1.0, 100);

    let samples = sampler
        .sample_unique(net.architecture_weights(), net.primitives(), 12, &mut rng)
        .unwrap();
    let distinct: HashSet<_> = samples.iter().cloned().collect();
    assert_eq!(distinct.len(), 12);
    assert_eq!(samples[0], net.discretize_max());
}
