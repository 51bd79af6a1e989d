use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cleaning::CleaningPolicy;
use crate::error::{PipelineError, PipelineResult};
use crate::function::{FunctionCategory, UsageVocabulary};

/// Parameters of one extraction run, read from JSON.
///
/// Every field has a default, so `{}` is a valid configuration. The older
/// parameter names (`table`, `buffer_size`, `neighbour_distances`,
/// `path_3DBAG`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name of the case-study area; also names the staging table.
    #[serde(alias = "table")]
    pub case_study: String,

    /// Outward offset, in metres, used to detect touching footprints.
    #[serde(alias = "buffer_size")]
    pub buffer_distance: f64,

    /// Radii, in metres, of the `neighbor_count_<r>` columns.
    #[serde(alias = "neighbour_distances")]
    pub neighbor_radii: Vec<f64>,

    /// Douglas–Peucker tolerance for `fp_vertices_simple`.
    pub simplify_tolerance: f64,

    /// Functions ignored on both sides of an adjacency pair.
    pub excluded_functions: Vec<FunctionCategory>,

    /// When set, rows whose function is not listed are deleted after
    /// classification.
    pub retain_functions: Option<Vec<FunctionCategory>>,

    /// Construction year meaning "unknown" in the source data.
    pub construction_year_sentinel: Option<i64>,

    /// Only seed entities with one of these labels.
    pub labels: Option<Vec<String>>,

    /// Refuse duplicate entity ids instead of dropping them with a warning.
    pub reject_duplicates: bool,

    pub vocabulary: UsageVocabulary,

    /// Level-of-detail tags with a metrics file each.
    pub lods: Vec<String>,

    /// Directory holding `merged_<lod>.csv`.
    #[serde(alias = "path_3DBAG")]
    pub metrics_dir: PathBuf,

    pub cleaning: CleaningPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            case_study: "buildings".to_string(),
            buffer_distance: 0.1,
            neighbor_radii: vec![25.0, 50.0, 75.0, 100.0],
            simplify_tolerance: 0.1,
            excluded_functions: vec![FunctionCategory::Others, FunctionCategory::Unknown],
            retain_functions: None,
            construction_year_sentinel: Some(1005),
            labels: None,
            reject_duplicates: false,
            vocabulary: UsageVocabulary::default(),
            lods: vec!["lod1".to_string(), "lod2".to_string()],
            metrics_dir: PathBuf::from("."),
            cleaning: CleaningPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !self.buffer_distance.is_finite() || self.buffer_distance < 0.0 {
            return Err(PipelineError::Config(format!(
                "buffer_distance must be a non-negative number, got {}",
                self.buffer_distance
            )));
        }
        if !self.simplify_tolerance.is_finite() || self.simplify_tolerance < 0.0 {
            return Err(PipelineError::Config(format!(
                "simplify_tolerance must be a non-negative number, got {}",
                self.simplify_tolerance
            )));
        }
        if let Some(r) = self
            .neighbor_radii
            .iter()
            .find(|r| !r.is_finite() || **r <= 0.0)
        {
            return Err(PipelineError::Config(format!(
                "neighbour radii must be positive, got {r}"
            )));
        }
        if self.lods.iter().any(|l| l.is_empty()) {
            return Err(PipelineError::Config("empty LoD tag".into()));
        }
        self.cleaning.validate()?;
        Ok(())
    }

    /// `<metrics_dir>/merged_<lod>.csv`
    pub fn metrics_path(&self, lod: &str) -> PathBuf {
        self.metrics_dir.join(format!("merged_{lod}.csv"))
    }
}
