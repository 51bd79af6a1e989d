//! Building feature extraction.
//!
//! Derives a per-building feature table for a downstream building-type
//! classifier from footprint geometry, usage units and externally computed
//! 3D metrics.
//!
//! A run is:
//! 1. seed a [`StagingTable`] from a [`GeometryStore`] ([`seed_table`]);
//! 2. run an ordered list of [`FeatureStep`]s ([`Pipeline::standard`]), each
//!    reading earlier columns and adding new ones;
//! 3. [`clean`] the table (drop helper and redundant columns, then rows
//!    missing required values);
//! 4. [`commit`] it to disk.
//!
//! Steps are idempotent, so a failed run can be resumed at the failing step
//! with [`Pipeline::run_from`].

pub mod adjacency;
pub mod attributes;
pub mod cleaning;
pub mod columns;
pub mod config;
mod error;
pub mod export;
pub mod function;
pub mod geometry;
pub mod metrics;
pub mod neighbors;
pub mod pipeline;
pub mod shape;
pub mod step;
pub mod store;

#[cfg(test)]
mod testing;

pub use cleaning::{clean, CleaningPolicy, CleaningReport, RedundantPair};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use export::commit;
pub use function::{FunctionCategory, UsageVocabulary};
pub use metrics::{MetricsTable, METRICS};
pub use pipeline::{seed_table, Pipeline, SkippingRun};
pub use step::{ColumnSpec, FeatureStep, StepReport};
pub use store::{BuildingStore, GeometryStore, SeedFilter, SeedRecord};

pub use staging::StagingTable;
