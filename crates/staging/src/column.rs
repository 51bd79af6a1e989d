use std::collections::BTreeSet;
use std::fmt;

use geo::{MultiPolygon, Point, Polygon};

/// A set of category labels attached to one entity.
pub type Tags = BTreeSet<String>;

/// Value type of a staging column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Tags,
    Int,
    Float,
    Polygon,
    MultiPolygon,
    Point,
}

impl ColumnType {
    /// Whether a spatial index may be built on columns of this type.
    #[inline]
    pub fn is_geometry(self) -> bool {
        matches!(
            self,
            ColumnType::Polygon | ColumnType::MultiPolygon | ColumnType::Point
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Text => "text",
            ColumnType::Tags => "tags",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Polygon => "polygon",
            ColumnType::MultiPolygon => "multipolygon",
            ColumnType::Point => "point",
        };

        f.write_str(s)
    }
}

/// Column storage: one nullable slot per row, in row order.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Tags(Vec<Option<Tags>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Polygon(Vec<Option<Polygon<f64>>>),
    MultiPolygon(Vec<Option<MultiPolygon<f64>>>),
    Point(Vec<Option<Point<f64>>>),
}

impl ColumnData {
    /// An all-null column of the given type.
    pub fn nulls(ty: ColumnType, len: usize) -> Self {
        match ty {
            ColumnType::Text => ColumnData::Text(vec![None; len]),
            ColumnType::Tags => ColumnData::Tags(vec![None; len]),
            ColumnType::Int => ColumnData::Int(vec![None; len]),
            ColumnType::Float => ColumnData::Float(vec![None; len]),
            ColumnType::Polygon => ColumnData::Polygon(vec![None; len]),
            ColumnType::MultiPolygon => ColumnData::MultiPolygon(vec![None; len]),
            ColumnType::Point => ColumnData::Point(vec![None; len]),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Text(_) => ColumnType::Text,
            ColumnData::Tags(_) => ColumnType::Tags,
            ColumnData::Int(_) => ColumnType::Int,
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::Polygon(_) => ColumnType::Polygon,
            ColumnData::MultiPolygon(_) => ColumnType::MultiPolygon,
            ColumnData::Point(_) => ColumnType::Point,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Text(v) => v.len(),
            ColumnData::Tags(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Polygon(v) => v.len(),
            ColumnData::MultiPolygon(v) => v.len(),
            ColumnData::Point(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Text(v) => v[row].is_none(),
            ColumnData::Tags(v) => v[row].is_none(),
            ColumnData::Int(v) => v[row].is_none(),
            ColumnData::Float(v) => v[row].is_none(),
            ColumnData::Polygon(v) => v[row].is_none(),
            ColumnData::MultiPolygon(v) => v[row].is_none(),
            ColumnData::Point(v) => v[row].is_none(),
        }
    }

    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_null(row)).count()
    }

    /// Keep the rows whose mask entry is `true`, preserving order.
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        fn retain<T>(values: &mut Vec<Option<T>>, keep: &[bool]) {
            let mut row = 0;
            values.retain(|_| {
                let k = keep[row];
                row += 1;
                k
            });
        }

        match self {
            ColumnData::Text(v) => retain(v, keep),
            ColumnData::Tags(v) => retain(v, keep),
            ColumnData::Int(v) => retain(v, keep),
            ColumnData::Float(v) => retain(v, keep),
            ColumnData::Polygon(v) => retain(v, keep),
            ColumnData::MultiPolygon(v) => retain(v, keep),
            ColumnData::Point(v) => retain(v, keep),
        }
    }
}

/// A named column in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) data: ColumnData,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }
}

/// Rust value types that map onto exactly one [`ColumnType`].
///
/// Typed reads and writes on the staging table go through this trait, so a
/// step asking for `f64` values of an integer column gets a type error
/// instead of a silent conversion.
pub trait ColumnValue: Clone + Send + Sync + Sized + 'static {
    const TYPE: ColumnType;

    fn slice(data: &ColumnData) -> Option<&[Option<Self>]>;

    fn wrap(values: Vec<Option<Self>>) -> ColumnData;
}

macro_rules! column_value {
    ($ty:ty, $variant:ident) => {
        impl ColumnValue for $ty {
            const TYPE: ColumnType = ColumnType::$variant;

            #[inline]
            fn slice(data: &ColumnData) -> Option<&[Option<Self>]> {
                match data {
                    ColumnData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            #[inline]
            fn wrap(values: Vec<Option<Self>>) -> ColumnData {
                ColumnData::$variant(values)
            }
        }
    };
}

column_value!(String, Text);
column_value!(Tags, Tags);
column_value!(i64, Int);
column_value!(f64, Float);
column_value!(Polygon<f64>, Polygon);
column_value!(MultiPolygon<f64>, MultiPolygon);
column_value!(Point<f64>, Point);
