//! Column names shared by the feature steps and the cleaning policy.

pub const LABEL: &str = "label";

pub const FUNCTION_TAGS: &str = "function_tags";
pub const FUNCTION: &str = "function";
pub const CONSTRUCTION_YEAR: &str = "construction_year";
pub const DWELLING_COUNT: &str = "dwelling_count";

pub const FOOTPRINT: &str = "footprint";
pub const FP_AREA: &str = "fp_area";
pub const FP_PERIMETER: &str = "fp_perimeter";
pub const FP_VERTICES: &str = "fp_vertices";
pub const FP_VERTICES_SIMPLE: &str = "fp_vertices_simple";
pub const OBB_SIDE_1: &str = "obb_side_1";
pub const OBB_SIDE_2: &str = "obb_side_2";
pub const FP_LENGTH: &str = "fp_length";
pub const FP_WIDTH: &str = "fp_width";

pub const FOOTPRINT_BUFFER: &str = "footprint_buffer";
pub const ADJACENT_COUNT: &str = "adjacent_count";
pub const ADJACENT_OF_ADJACENT_COUNT: &str = "adjacent_of_adjacent_count";
pub const CENTROID: &str = "centroid";

/// Stems of the derived height columns, suffixed with the LoD tag.
pub const HEIGHT_MAX: &str = "height_max";
pub const HEIGHT_MIN: &str = "height_min";

/// `neighbor_count_25` for 25.0, `neighbor_count_12_5` for 12.5.
pub fn neighbor_count(radius: f64) -> String {
    if radius.fract() == 0.0 {
        format!("neighbor_count_{}", radius as i64)
    } else {
        format!("neighbor_count_{}", radius.to_string().replace('.', "_"))
    }
}

/// `<stem>_<lod>`, e.g. `actual_volume_lod1`.
pub fn with_lod(stem: &str, lod: &str) -> String {
    format!("{stem}_{lod}")
}
