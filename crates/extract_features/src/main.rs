use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::{path::PathBuf, sync::Arc, time::Instant};

use bldg_features::{
    clean, commit, seed_table, BuildingStore, FunctionCategory, Pipeline, PipelineConfig,
    SeedFilter,
};

/// `extract_features` - derive the per-building feature table of a case
/// study area.
///
/// Loads the building layer, usage units and labels, runs the feature
/// pipeline, cleans the result and writes it as CSV.
#[derive(Parser, Debug)]
#[command(name = "extract_features", version, about, long_about = None)]
struct Args {
    /// JSON pipeline configuration; defaults apply when omitted.
    #[arg(long, env = "EXTRACT_CONFIG")]
    config: Option<PathBuf>,

    /// GeoJSON FeatureCollection of building footprints.
    #[arg(long, env = "BUILDINGS_PATH")]
    buildings: PathBuf,

    /// JSON array of usage units (`id`, `building_refs`, `uses`).
    #[arg(long, env = "UNITS_PATH")]
    units: Option<PathBuf>,

    /// CSV of ground-truth labels (`entity_id,label`).
    #[arg(long, env = "LABELS_PATH")]
    labels: Option<PathBuf>,

    /// Directory with `merged_<lod>.csv`; overrides the configuration.
    #[arg(long, env = "METRICS_DIR")]
    metrics_dir: Option<PathBuf>,

    #[arg(long, default_value = "features.csv")]
    output: PathBuf,

    /// Adjacency buffer distance in metres; overrides the configuration.
    #[arg(long)]
    buffer_distance: Option<f64>,

    /// Comma-separated neighbour radii in metres; overrides the configuration.
    #[arg(long, value_delimiter = ',')]
    radii: Option<Vec<f64>>,

    /// Comma-separated LoD tags; overrides the configuration.
    #[arg(long, value_delimiter = ',')]
    lods: Option<Vec<String>>,

    /// Only keep buildings of these functions, e.g. `Residential`.
    #[arg(long, value_delimiter = ',')]
    retain: Option<Vec<FunctionCategory>>,

    /// Carry on without a LoD whose metrics file is missing or unreadable.
    /// The table is then written uncleaned.
    #[arg(long, default_value_t = false)]
    allow_missing_metrics: bool,

    /// Write the table as the steps left it, without the cleaning stage.
    #[arg(long, default_value_t = false)]
    no_clean: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.metrics_dir {
        config.metrics_dir = dir.clone();
    }
    if let Some(d) = args.buffer_distance {
        config.buffer_distance = d;
    }
    if let Some(radii) = &args.radii {
        config.neighbor_radii = radii.clone();
    }
    if let Some(lods) = &args.lods {
        config.lods = lods.clone();
    }
    if let Some(retain) = &args.retain {
        config.retain_functions = Some(retain.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_store(args: &Args) -> Result<BuildingStore> {
    let mut store = BuildingStore::new();
    store
        .load_buildings(&args.buildings)
        .with_context(|| format!("loading buildings from {}", args.buildings.display()))?;
    if let Some(path) = &args.units {
        store
            .load_units(path)
            .with_context(|| format!("loading usage units from {}", path.display()))?;
    }
    if let Some(path) = &args.labels {
        store
            .load_labels(path)
            .with_context(|| format!("loading labels from {}", path.display()))?;
    }
    Ok(store)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let t0 = Instant::now();

    let config = load_config(&args)?;
    let store = Arc::new(load_store(&args)?);

    let filter = SeedFilter {
        labels: config.labels.clone(),
    };
    let mut table = seed_table(
        store.as_ref(),
        &config.case_study,
        &filter,
        config.reject_duplicates,
    )?;

    let pipeline = Pipeline::standard(&config, store)?;
    info!(
        "{}: running {} steps on {} entities",
        config.case_study,
        pipeline.len(),
        table.len()
    );

    let complete = if args.allow_missing_metrics {
        let run = pipeline
            .run_skipping_missing_sources(&mut table)
            .context("feature pipeline failed")?;
        if !run.is_complete() {
            warn!("skipped steps: {}", run.skipped.join(", "));
        }
        run.is_complete()
    } else {
        pipeline.run(&mut table).context("feature pipeline failed")?;
        true
    };

    if args.no_clean {
        info!("cleaning skipped");
    } else if !complete {
        warn!("cleaning skipped: the feature table is missing metrics columns");
    } else {
        let report = clean(&mut table, &config.cleaning)?;
        for d in report.discrepancies.iter().filter(|d| d.rows > 0) {
            warn!(
                "{} vs {}: {} of {} rows disagree",
                d.keep, d.drop, d.rows, d.compared
            );
        }
    }

    let rows = commit(&table, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        "Done: {} rows written to {} in {:.2?}",
        rows,
        args.output.display(),
        t0.elapsed()
    );

    Ok(())
}
