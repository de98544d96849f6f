//! Command-line interface
//!
//! Runs a meta-search over a CSV dataset and reports the selected model.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use colored::*;

use crate::nas::network::{MixedOpNetworkBuilder, SearchNetwork};
use crate::nas::search_space::Primitive;
use crate::search::{CandidateInit, MetaSearch, SearchConfig};
use crate::tracking::storage::LocalStorage;
use crate::training::loss::Criterion;
use crate::utils::data_loader::{DataLoader, Dataset};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}
fn warn(s: &str) -> ColoredString {
    s.truecolor(230, 180, 80)
}

fn step_run(msg: &str) {
    println!("  {} {}", accent("›"), msg);
}

fn step_done(msg: &str, detail: &str) {
    println!("  {} {} {}", ok("✓"), msg, dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "darts-search")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Differentiable architecture meta-search for small computation graphs")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sweep the configuration grid and select the best model
    Search(SearchArgs),

    /// List the available primitive operations
    Primitives,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Input data file (CSV with a header row)
    #[arg(short, long)]
    pub data: PathBuf,

    /// Target column(s); every other column is an input
    #[arg(short, long, required = true, value_delimiter = ',')]
    pub target: Vec<String>,

    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for models, architectures and summary tables
    #[arg(short, long, default_value = "search_output")]
    pub output: PathBuf,

    /// Version tag for artifact names (default: UTC timestamp)
    #[arg(long)]
    pub search_id: Option<String>,

    /// Candidate operations
    #[arg(long, value_delimiter = ',')]
    pub primitives: Vec<String>,

    /// Regularization strengths of the grid
    #[arg(long, value_delimiter = ',')]
    pub regularization: Vec<f64>,

    /// Graph sizes of the grid
    #[arg(long, value_delimiter = ',')]
    pub graph_sizes: Vec<usize>,

    /// Seeds of the grid
    #[arg(long, value_delimiter = ',')]
    pub seeds: Vec<u64>,

    /// Epoch budget
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Candidates evaluated per configuration
    #[arg(long)]
    pub n_samples: Option<usize>,

    /// Retrain candidates from fresh weights instead of the search weights
    #[arg(long)]
    pub cold_start: bool,

    /// Use the unrolled architecture gradient
    #[arg(long)]
    pub unrolled: bool,

    /// Treat the single target column as class indices
    #[arg(long)]
    pub classify: bool,
}

impl SearchArgs {
    /// Merge the configuration file (if any) with the command-line overrides
    pub fn to_config(&self) -> anyhow::Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::from_json_file(path)?,
            None => SearchConfig::default()
                .with_search_id(chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()),
        };

        if let Some(id) = &self.search_id {
            config.search_id = id.clone();
        }
        if !self.primitives.is_empty() {
            config.primitives = self.primitives.clone();
        }
        if !self.regularization.is_empty() {
            config.grid.regularization_strengths = self.regularization.clone();
        }
        if !self.graph_sizes.is_empty() {
            config.grid.graph_sizes = self.graph_sizes.clone();
        }
        if !self.seeds.is_empty() {
            config.grid.seeds = self.seeds.clone();
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(n) = self.n_samples {
            config.evaluation.n_samples = n;
        }
        if self.cold_start {
            config.evaluation.init = CandidateInit::ColdStart;
        }
        if self.unrolled {
            config.architect.unrolled = true;
        }
        if self.classify {
            config.criterion = Criterion::CrossEntropy;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Number of network outputs the criterion needs for this dataset
fn output_width(data: &Dataset, criterion: Criterion) -> anyhow::Result<usize> {
    match criterion {
        Criterion::MeanSquaredError => Ok(data.n_outputs()),
        Criterion::CrossEntropy => {
            if data.n_outputs() != 1 {
                anyhow::bail!("classification needs exactly one target column");
            }
            let max = data.targets().iter().cloned().fold(0.0, f64::max);
            Ok(max as usize + 1)
        }
    }
}

// ─── Search ────────────────────────────────────────────────────────────────────

pub fn cmd_search(args: &SearchArgs) -> anyhow::Result<()> {
    section("Search");

    let config = args.to_config()?;
    let start = Instant::now();
    let data = DataLoader::new().load_csv(&args.data, &args.target)?;
    step_done(
        "Loaded data",
        &format!("{} rows × {} inputs in {:?}", data.len(), data.n_inputs(), start.elapsed()),
    );

    let primitives = config.primitive_set()?;
    let factory = MixedOpNetworkBuilder::new(data.n_inputs(), output_width(&data, config.criterion)?, primitives)
        .with_classifier_weight_decay(config.training.classifier_weight_decay);
    let store = LocalStorage::new(&args.output)?;

    let n_configs = config.grid.configurations().len();
    println!("  {:<16} {}", muted("Search id"), config.search_id.white());
    println!("  {:<16} {}", muted("Configurations"), n_configs.to_string().white());
    println!("  {:<16} {}", muted("Primitives"), config.primitives.join(", ").white());
    println!("  {:<16} {}", muted("Output"), args.output.display());
    println!();

    step_run("Sweeping configurations");
    let start = Instant::now();
    let mut search = MetaSearch::new(config, factory, store)?;
    let report = search.run(&data)?;
    step_done(
        "Sweep finished",
        &format!("{} ok, {} failed in {:?}", report.runs.len(), report.failures.len(), start.elapsed()),
    );

    for failure in &report.failures {
        println!("  {} {} {}", warn("!"), failure.configuration, dim(&failure.error));
    }

    let best = search.select_best(&report.registry)?;

    section("Best model");
    println!("  {:<16} {}", muted("Model"), best.record.model_file.white());
    println!("  {:<16} {}", muted("Architecture"), best.record.architecture_file.white());
    println!("  {:<16} {}", muted("Graph size"), best.record.graph_size.to_string().white());
    println!(
        "  {:<16} {}",
        muted("Held-out loss"),
        format!("{:.6}", best.record.held_out_loss).white().bold()
    );
    println!();
    for line in best.network.render(&best.architecture) {
        println!("    {}", line.cyan());
    }
    println!();

    Ok(())
}

// ─── Primitives ────────────────────────────────────────────────────────────────

pub fn cmd_primitives() -> anyhow::Result<()> {
    section("Primitives");

    let defaults = Primitive::default_set();
    println!("  {:<12} {:>7} {:>8}", muted("Name"), muted("Params"), muted("Default"));
    println!("  {}", dim(&"─".repeat(29)));
    for p in Primitive::all() {
        let mark = if defaults.contains(&p) { ok("yes") } else { dim("no") };
        println!("  {:<12} {:>7} {:>8}", p.name(), p.num_params(), mark);
    }
    println!();
    Ok(())
}
