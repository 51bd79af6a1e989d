//! Row-wise footprint shape descriptors.

use geo::Polygon;
use rayon::prelude::*;

use staging::{ColumnType, StagingTable};

use crate::columns::{
    FOOTPRINT, FP_AREA, FP_LENGTH, FP_PERIMETER, FP_VERTICES, FP_VERTICES_SIMPLE, FP_WIDTH,
    OBB_SIDE_1, OBB_SIDE_2,
};
use crate::error::PipelineResult;
use crate::geometry;
use crate::step::{ColumnSpec, FeatureStep, StepReport};

/// `fp_area`
pub struct FootprintAreaStep;

impl FeatureStep for FootprintAreaStep {
    fn name(&self) -> String {
        "footprint_area".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(FP_AREA, ColumnType::Float)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        table.compute_par(FP_AREA, |t, row| {
            t.value::<Polygon<f64>>(FOOTPRINT, row).ok().flatten().map(geometry::area)
        })?;
        StepReport::from_column(self.name(), table, FP_AREA)
    }
}

/// `fp_perimeter`, holes included.
pub struct FootprintPerimeterStep;

impl FeatureStep for FootprintPerimeterStep {
    fn name(&self) -> String {
        "footprint_perimeter".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![ColumnSpec::new(FP_PERIMETER, ColumnType::Float)]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        table.compute_par(FP_PERIMETER, |t, row| {
            t.value::<Polygon<f64>>(FOOTPRINT, row).ok().flatten().map(geometry::perimeter)
        })?;
        StepReport::from_column(self.name(), table, FP_PERIMETER)
    }
}

/// `fp_vertices` and `fp_vertices_simple`.
pub struct VertexCountStep {
    pub tolerance: f64,
}

impl FeatureStep for VertexCountStep {
    fn name(&self) -> String {
        "vertex_count".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(FP_VERTICES, ColumnType::Int),
            ColumnSpec::new(FP_VERTICES_SIMPLE, ColumnType::Int),
        ]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let tolerance = self.tolerance;
        table.compute_par(FP_VERTICES, |t, row| {
            t.value::<Polygon<f64>>(FOOTPRINT, row)
                .ok()
                .flatten()
                .map(|fp| geometry::vertex_count(fp) as i64)
        })?;
        table.compute_par(FP_VERTICES_SIMPLE, |t, row| {
            t.value::<Polygon<f64>>(FOOTPRINT, row)
                .ok()
                .flatten()
                .map(|fp| geometry::vertex_count(&geometry::simplify_preserving(fp, tolerance)) as i64)
        })?;
        StepReport::from_column(self.name(), table, FP_VERTICES)
    }
}

/// `obb_side_1`, `obb_side_2`: sides of the oriented minimum bounding
/// rectangle, in no particular order.
pub struct OrientedBoundingRectStep;

impl FeatureStep for OrientedBoundingRectStep {
    fn name(&self) -> String {
        "oriented_bounding_rect".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![FOOTPRINT.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(OBB_SIDE_1, ColumnType::Float),
            ColumnSpec::new(OBB_SIDE_2, ColumnType::Float),
        ]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let sides: Vec<Option<(f64, f64)>> = {
            let footprints = table.get::<Polygon<f64>>(FOOTPRINT)?;
            footprints
                .par_iter()
                .map(|fp| fp.as_ref().map(geometry::oriented_rect_sides))
                .collect()
        };

        table.assign(OBB_SIDE_1, sides.iter().map(|s| s.map(|s| s.0)).collect())?;
        table.assign(OBB_SIDE_2, sides.iter().map(|s| s.map(|s| s.1)).collect())?;
        StepReport::from_column(self.name(), table, OBB_SIDE_1)
    }
}

/// `fp_length = max(side)`, `fp_width = min(side)`.
pub struct LengthWidthStep;

impl FeatureStep for LengthWidthStep {
    fn name(&self) -> String {
        "length_width".into()
    }

    fn inputs(&self) -> Vec<String> {
        vec![OBB_SIDE_1.into(), OBB_SIDE_2.into()]
    }

    fn outputs(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(FP_LENGTH, ColumnType::Float),
            ColumnSpec::new(FP_WIDTH, ColumnType::Float),
        ]
    }

    fn apply(&self, table: &mut StagingTable) -> PipelineResult<StepReport> {
        let sides = |t: &StagingTable, row: usize| -> Option<(f64, f64)> {
            let a = *t.value::<f64>(OBB_SIDE_1, row).ok()??;
            let b = *t.value::<f64>(OBB_SIDE_2, row).ok()??;
            Some((a, b))
        };
        table.compute_par(FP_LENGTH, |t, row| sides(t, row).map(|(a, b)| a.max(b)))?;
        table.compute_par(FP_WIDTH, |t, row| sides(t, row).map(|(a, b)| a.min(b)))?;
        StepReport::from_column(self.name(), table, FP_LENGTH)
    }
}
