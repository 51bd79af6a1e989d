//! Source data the pipeline seeds from and reads attributes out of.
//!
//! [`GeometryStore`] is the read-only view the feature steps need;
//! [`BuildingStore`] implements it in memory, loaded from a GeoJSON building
//! layer, a JSON list of usage units and a CSV of ground-truth labels.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow_schema::{DataType, Field, Schema};
use geo::{Area, LineString, Polygon};
use hashbrown::HashMap;
use log::{debug, info, warn};
use serde::Deserialize;

use staging::Tags;

use crate::error::{PipelineError, PipelineResult};

/// One entity handed to the staging table at seed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub entity_id: String,
    pub label: Option<String>,
}

/// Restricts which entities are seeded.
#[derive(Debug, Clone, Default)]
pub struct SeedFilter {
    /// Keep only entities whose label is listed.
    pub labels: Option<Vec<String>>,
}

impl SeedFilter {
    fn accepts(&self, label: Option<&str>) -> bool {
        match (&self.labels, label) {
            (None, _) => true,
            (Some(allowed), Some(label)) => allowed.iter().any(|l| l == label),
            (Some(_), None) => false,
        }
    }
}

/// Read access to entity geometry and attributes.
pub trait GeometryStore: Send + Sync {
    fn seed(&self, filter: &SeedFilter) -> Vec<SeedRecord>;

    fn footprint(&self, entity_id: &str) -> Option<Polygon<f64>>;

    /// Distinct usage labels over all units referencing the entity.
    fn usage_tags(&self, entity_id: &str) -> Option<Tags>;

    fn construction_year(&self, entity_id: &str) -> Option<i64>;

    /// Number of distinct usage units referencing the entity.
    fn dwelling_count(&self, entity_id: &str) -> Option<i64>;
}

#[derive(Debug, Clone, Default)]
struct Building {
    footprint: Option<Polygon<f64>>,
    construction_year: Option<i64>,
}

#[derive(Debug, Default)]
struct UnitSummary {
    units: BTreeSet<String>,
    uses: Tags,
}

/// In-memory [`GeometryStore`].
#[derive(Debug, Default)]
pub struct BuildingStore {
    order: Vec<String>,
    buildings: HashMap<String, Building>,
    units: HashMap<String, UnitSummary>,
    labels: HashMap<String, String>,
    label_order: Vec<String>,
}

impl BuildingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Add or replace a building. Re-inserting an id keeps its first
    /// position in seed order.
    pub fn insert_building(
        &mut self,
        id: impl Into<String>,
        footprint: Option<Polygon<f64>>,
        construction_year: Option<i64>,
    ) {
        let id = id.into();
        if !self.buildings.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.buildings.insert(
            id,
            Building {
                footprint,
                construction_year,
            },
        );
    }

    /// Record a usage unit (dwelling, shop, office...) and the buildings it
    /// lies in.
    pub fn insert_unit<'a>(
        &mut self,
        unit_id: &str,
        building_refs: impl IntoIterator<Item = &'a str>,
        uses: impl IntoIterator<Item = &'a str> + Clone,
    ) {
        for building in building_refs {
            let summary = self.units.entry(building.to_owned()).or_default();
            summary.units.insert(unit_id.to_owned());
            summary
                .uses
                .extend(uses.clone().into_iter().map(str::to_owned));
        }
    }

    pub fn insert_label(&mut self, entity_id: impl Into<String>, label: impl Into<String>) {
        let entity_id = entity_id.into();
        if self
            .labels
            .insert(entity_id.clone(), label.into())
            .is_none()
        {
            self.label_order.push(entity_id);
        }
    }

    /// Load the building layer (GeoJSON FeatureCollection).
    ///
    /// `properties.id` names the building, `properties.construction_year`
    /// is optional. Geometry may be a Polygon, a MultiPolygon (the largest
    /// part is kept) or null.
    pub fn load_buildings(&mut self, path: impl AsRef<Path>) -> PipelineResult<usize> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::external(path, e))?;
        let root: FeatureCollection = serde_json::from_reader(BufReader::new(file))?;

        let mut without_geometry = 0usize;
        let count = root.features.len();
        for feature in root.features {
            let footprint = feature
                .geometry
                .and_then(|g| g.into_polygon(&feature.properties.id));
            if footprint.is_none() {
                without_geometry += 1;
            }
            self.insert_building(
                feature.properties.id,
                footprint,
                feature.properties.construction_year,
            );
        }

        if without_geometry > 0 {
            warn!(
                "{}: {} of {} buildings have no usable footprint",
                path.display(),
                without_geometry,
                count
            );
        }
        info!("{}: loaded {} buildings", path.display(), count);
        Ok(count)
    }

    /// Load usage units: a JSON array of `{ id, building_refs, uses }`.
    pub fn load_units(&mut self, path: impl AsRef<Path>) -> PipelineResult<usize> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::external(path, e))?;
        let units: Vec<UnitJson> = serde_json::from_reader(BufReader::new(file))?;

        for unit in &units {
            self.insert_unit(
                &unit.id,
                unit.building_refs.iter().map(String::as_str),
                unit.uses.iter().map(String::as_str),
            );
        }

        info!("{}: loaded {} usage units", path.display(), units.len());
        Ok(units.len())
    }

    /// Load ground-truth labels from a CSV with columns `entity_id,label`.
    pub fn load_labels(&mut self, path: impl AsRef<Path>) -> PipelineResult<usize> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| PipelineError::external(path, e))?;

        let (schema, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, Some(100))?;
        file.rewind()?;
        let schema = with_types(&schema, &[("entity_id", DataType::Utf8), ("label", DataType::Utf8)]);

        for required in ["entity_id", "label"] {
            if schema.field_with_name(required).is_err() {
                return Err(PipelineError::external(
                    path,
                    format!("missing column `{required}`"),
                ));
            }
        }

        let reader = ReaderBuilder::new(Arc::new(schema))
            .with_header(true)
            .build(file)?;

        let mut count = 0usize;
        for batch in reader {
            let batch = batch?;
            let ids = text_column(&batch, "entity_id")?;
            let labels = text_column(&batch, "label")?;
            let ids = ids.as_string::<i32>();
            let labels = labels.as_string::<i32>();

            for row in 0..batch.num_rows() {
                if ids.is_null(row) || labels.is_null(row) {
                    continue;
                }
                self.insert_label(ids.value(row), labels.value(row));
                count += 1;
            }
        }

        info!("{}: loaded {} labels", path.display(), count);
        Ok(count)
    }
}

/// `schema` with the named fields retyped. Inference only samples leading
/// rows, and an all-digit id like `0503100000000001` would lose its leading
/// zero as an integer.
pub(crate) fn with_types(schema: &Schema, types: &[(&str, DataType)]) -> Schema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| {
            match types.iter().find(|(name, _)| name == field.name()) {
                Some((_, ty)) => field.as_ref().clone().with_data_type(ty.clone()),
                None => field.as_ref().clone(),
            }
        })
        .collect();
    Schema::new_with_metadata(fields, schema.metadata().clone())
}

/// A CSV column cast to UTF-8.
pub(crate) fn text_column(
    batch: &arrow::record_batch::RecordBatch,
    name: &str,
) -> PipelineResult<arrow::array::ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| arrow_schema::ArrowError::SchemaError(format!("no column `{name}`")))?;
    Ok(arrow::compute::cast(column, &DataType::Utf8)?)
}

impl GeometryStore for BuildingStore {
    /// Buildings in load order, then labelled ids absent from the building
    /// layer (their footprint is null).
    fn seed(&self, filter: &SeedFilter) -> Vec<SeedRecord> {
        let extra: Vec<&String> = self
            .label_order
            .iter()
            .filter(|id| !self.buildings.contains_key(*id))
            .collect();
        let total = self.order.len() + extra.len();

        let records: Vec<SeedRecord> = self
            .order
            .iter()
            .chain(extra)
            .filter_map(|id| {
                let label = self.labels.get(id).cloned();
                filter.accepts(label.as_deref()).then(|| SeedRecord {
                    entity_id: id.clone(),
                    label,
                })
            })
            .collect();

        debug!("seed: {} of {} entities pass the filter", records.len(), total);
        records
    }

    fn footprint(&self, entity_id: &str) -> Option<Polygon<f64>> {
        self.buildings.get(entity_id)?.footprint.clone()
    }

    fn usage_tags(&self, entity_id: &str) -> Option<Tags> {
        let summary = self.units.get(entity_id)?;
        (!summary.uses.is_empty()).then(|| summary.uses.clone())
    }

    fn construction_year(&self, entity_id: &str) -> Option<i64> {
        self.buildings.get(entity_id)?.construction_year
    }

    fn dwelling_count(&self, entity_id: &str) -> Option<i64> {
        let summary = self.units.get(entity_id)?;
        (!summary.units.is_empty()).then(|| summary.units.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// GeoJSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<GeometryJson>,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    id: String,
    #[serde(default)]
    construction_year: Option<i64>,
}

/// Positions are `[x, y]` or `[x, y, z]`; z is ignored.
type Ring = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeometryJson {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

impl GeometryJson {
    fn into_polygon(self, id: &str) -> Option<Polygon<f64>> {
        match self {
            GeometryJson::Polygon { coordinates } => polygon_from_rings(coordinates),
            GeometryJson::MultiPolygon { coordinates } => {
                if coordinates.len() > 1 {
                    warn!("{id}: multipolygon with {} parts, keeping the largest", coordinates.len());
                }
                coordinates
                    .into_iter()
                    .filter_map(polygon_from_rings)
                    .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
            }
            GeometryJson::Unsupported => {
                warn!("{id}: unsupported geometry type, footprint left null");
                None
            }
        }
    }
}

fn polygon_from_rings(rings: Vec<Ring>) -> Option<Polygon<f64>> {
    let mut rings = rings.into_iter().map(|ring| {
        LineString::from(
            ring.into_iter()
                .filter(|p| p.len() >= 2)
                .map(|p| (p[0], p[1]))
                .collect::<Vec<_>>(),
        )
    });

    let exterior = rings.next()?;
    if exterior.0.len() < 3 {
        return None;
    }
    Some(Polygon::new(exterior, rings.collect()))
}

#[derive(Debug, Deserialize)]
struct UnitJson {
    id: String,
    #[serde(default)]
    building_refs: Vec<String>,
    #[serde(default)]
    uses: Vec<String>,
}
