use hashbrown::HashMap;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::column::{Column, ColumnData, ColumnType, ColumnValue};
use crate::error::{StagingError, StagingResult};
use crate::index::SpatialIndex;

/// Mutable, run-scoped table of entities keyed by a unique string id.
///
/// Columns are added explicitly with a type and filled by whole-column
/// assignment. Every mutation is visible to the next reader; nothing is
/// persisted by the table itself.
#[derive(Clone)]
pub struct StagingTable {
    name: String,
    ids: Vec<String>,
    rows: HashMap<String, usize>,
    columns: Vec<Column>,
    indexes: Vec<SpatialIndex>,
}

impl StagingTable {
    /// Name of the implicit, immutable id column.
    pub const ID_COLUMN: &'static str = "entity_id";

    /// Seed a fresh table from a collection of entity ids.
    ///
    /// With `enforce_unique`, repeated ids are dropped (first occurrence
    /// wins) and the count is logged. Without it a repeated id is an error,
    /// since rows are addressed by id.
    pub fn seed<I>(name: impl Into<String>, ids: I, enforce_unique: bool) -> StagingResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let name = name.into();
        let mut table = Self {
            name,
            ids: Vec::new(),
            rows: HashMap::new(),
            columns: Vec::new(),
            indexes: Vec::new(),
        };

        let mut duplicates = 0usize;
        for id in ids {
            if table.rows.contains_key(&id) {
                if !enforce_unique {
                    return Err(StagingError::DuplicateEntity(id));
                }
                duplicates += 1;
                continue;
            }
            table.rows.insert(id.clone(), table.ids.len());
            table.ids.push(id);
        }

        if duplicates > 0 {
            warn!(
                "{}: uniqueness on {} dropped {} duplicate ids",
                table.name,
                Self::ID_COLUMN,
                duplicates
            );
        }
        info!("{}: seeded {} entities", table.name, table.ids.len());

        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[inline]
    pub fn entity_id(&self, row: usize) -> &str {
        &self.ids[row]
    }

    pub fn row_of(&self, entity_id: &str) -> Option<usize> {
        self.rows.get(entity_id).copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).map(Column::column_type)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Fail with the first missing column, if any.
    pub fn require<'a, I>(&self, names: I) -> StagingResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            if name != Self::ID_COLUMN && !self.has_column(name) {
                return Err(StagingError::ColumnNotFound(name.to_owned()));
            }
        }
        Ok(())
    }

    /// Declare a column. Returns `true` if it was created, `false` if a
    /// column of the same name and type already existed.
    pub fn add_column(&mut self, name: &str, ty: ColumnType) -> StagingResult<bool> {
        if name == Self::ID_COLUMN {
            return Err(StagingError::Reserved(name.to_owned()));
        }

        if let Some(existing) = self.column(name) {
            let found = existing.column_type();
            if found != ty {
                return Err(StagingError::TypeMismatch {
                    column: name.to_owned(),
                    expected: ty,
                    found,
                });
            }
            debug!("{}: column {} already present", self.name, name);
            return Ok(false);
        }

        self.columns.push(Column {
            name: name.to_owned(),
            data: ColumnData::nulls(ty, self.len()),
        });
        debug!("{}: added column {} ({})", self.name, name, ty);
        Ok(true)
    }

    /// Remove a column and any index on it. Returns whether it existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.columns.remove(pos);
                self.invalidate_index(name);
                debug!("{}: dropped column {}", self.name, name);
                true
            }
            None => false,
        }
    }

    /// Typed view of a whole column.
    pub fn get<T: ColumnValue>(&self, name: &str) -> StagingResult<&[Option<T>]> {
        let column = self
            .column(name)
            .ok_or_else(|| StagingError::ColumnNotFound(name.to_owned()))?;

        T::slice(&column.data).ok_or_else(|| StagingError::TypeMismatch {
            column: name.to_owned(),
            expected: T::TYPE,
            found: column.column_type(),
        })
    }

    /// Typed single cell.
    pub fn value<T: ColumnValue>(&self, name: &str, row: usize) -> StagingResult<Option<&T>> {
        Ok(self.get::<T>(name)?[row].as_ref())
    }

    /// Overwrite a declared column with one value per row.
    pub fn assign<T: ColumnValue>(&mut self, name: &str, values: Vec<Option<T>>) -> StagingResult<()> {
        if values.len() != self.len() {
            return Err(StagingError::LengthMismatch {
                column: name.to_owned(),
                expected: self.len(),
                found: values.len(),
            });
        }

        let pos = self
            .position(name)
            .ok_or_else(|| StagingError::ColumnNotFound(name.to_owned()))?;

        let found = self.columns[pos].column_type();
        if found != T::TYPE {
            return Err(StagingError::TypeMismatch {
                column: name.to_owned(),
                expected: T::TYPE,
                found,
            });
        }

        self.columns[pos].data = T::wrap(values);
        self.invalidate_index(name);
        Ok(())
    }

    /// Overwrite a declared column from `(entity_id, value)` pairs.
    ///
    /// Rows without a pair become null; pairs naming unknown ids are
    /// ignored. Returns the number of rows that received a value.
    pub fn assign_by_id<'a, T, I>(&mut self, name: &str, pairs: I) -> StagingResult<usize>
    where
        T: ColumnValue,
        I: IntoIterator<Item = (&'a str, T)>,
    {
        let mut values: Vec<Option<T>> = vec![None; self.len()];
        let mut matched = 0usize;

        for (id, value) in pairs {
            if let Some(row) = self.row_of(id) {
                if values[row].is_none() {
                    matched += 1;
                }
                values[row] = Some(value);
            }
        }

        self.assign(name, values)?;
        Ok(matched)
    }

    /// Recompute a column row by row from the current table state.
    pub fn compute<T, F>(&mut self, name: &str, f: F) -> StagingResult<()>
    where
        T: ColumnValue,
        F: Fn(&Self, usize) -> Option<T>,
    {
        let this: &Self = self;
        let values: Vec<Option<T>> = (0..this.len()).map(|row| f(this, row)).collect();
        self.assign(name, values)
    }

    /// Like [`compute`](Self::compute), rows evaluated in parallel.
    ///
    /// Only valid for functions without cross-row writes; the table is
    /// shared read-only while the closure runs.
    pub fn compute_par<T, F>(&mut self, name: &str, f: F) -> StagingResult<()>
    where
        T: ColumnValue,
        F: Fn(&Self, usize) -> Option<T> + Sync + Send,
    {
        let this: &Self = self;
        let values: Vec<Option<T>> = (0..this.len())
            .into_par_iter()
            .map(|row| f(this, row))
            .collect();
        self.assign(name, values)
    }

    /// Delete every row matching `predicate`. Returns the number deleted.
    pub fn delete_rows<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Self, usize) -> bool,
    {
        let this: &Self = self;
        let keep: Vec<bool> = (0..this.len()).map(|row| !predicate(this, row)).collect();
        let deleted = keep.iter().filter(|k| !**k).count();
        if deleted == 0 {
            return 0;
        }

        let mut row = 0;
        self.ids.retain(|_| {
            let k = keep[row];
            row += 1;
            k
        });
        for column in &mut self.columns {
            column.data.retain_rows(&keep);
        }

        self.rows = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), row))
            .collect();

        // Row numbers shifted; every index is stale.
        if !self.indexes.is_empty() {
            debug!("{}: dropping {} spatial indexes after delete", self.name, self.indexes.len());
            self.indexes.clear();
        }

        deleted
    }

    /// Build an R-tree index on a geometry column.
    ///
    /// Returns `false` when an index already exists; that is logged and
    /// otherwise treated as success.
    pub fn create_spatial_index(&mut self, column: &str) -> StagingResult<bool> {
        if self.spatial_index(column).is_some() {
            info!("{}: spatial index on {} already exists", self.name, column);
            return Ok(false);
        }

        let data = &self
            .column(column)
            .ok_or_else(|| StagingError::ColumnNotFound(column.to_owned()))?
            .data;

        let index = SpatialIndex::build(column, data)
            .ok_or_else(|| StagingError::NotGeometry(column.to_owned()))?;

        debug!("{}: indexed {} geometries of {}", self.name, index.len(), column);
        self.indexes.push(index);
        Ok(true)
    }

    pub fn spatial_index(&self, column: &str) -> Option<&SpatialIndex> {
        self.indexes.iter().find(|idx| idx.column() == column)
    }

    fn invalidate_index(&mut self, column: &str) {
        let before = self.indexes.len();
        self.indexes.retain(|idx| idx.column() != column);
        if self.indexes.len() != before {
            debug!("{}: spatial index on {} invalidated", self.name, column);
        }
    }
}

impl PartialEq for StagingTable {
    /// Tables are equal when they hold the same ids and columns in the same
    /// order; names and indexes are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids && self.columns == other.columns
    }
}

impl std::fmt::Debug for StagingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingTable")
            .field("name", &self.name)
            .field("rows", &self.ids.len())
            .field(
                "columns",
                &self
                    .columns
                    .iter()
                    .map(|c| (c.name.as_str(), c.column_type()))
                    .collect::<Vec<_>>(),
            )
            .field("indexes", &self.indexes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn table(ids: &[&str]) -> StagingTable {
        StagingTable::seed("t", ids.iter().map(|s| s.to_string()), true).unwrap()
    }

    #[test]
    fn seed_enforcing_uniqueness_keeps_first_occurrence() {
        let t = table(&["a", "b", "a", "c"]);
        assert_eq!(t.ids(), ["a", "b", "c"]);
        assert_eq!(t.row_of("c"), Some(2));
    }

    #[test]
    fn seed_without_enforcement_rejects_duplicates() {
        let err = StagingTable::seed("t", vec!["a".to_string(), "a".to_string()], false).unwrap_err();
        assert!(matches!(err, StagingError::DuplicateEntity(id) if id == "a"));
    }

    #[test]
    fn add_column_is_idempotent_and_typed() {
        let mut t = table(&["a", "b"]);
        assert!(t.add_column("fp_area", ColumnType::Float).unwrap());
        t.assign("fp_area", vec![Some(1.0), None]).unwrap();

        // Re-adding keeps the data.
        assert!(!t.add_column("fp_area", ColumnType::Float).unwrap());
        assert_eq!(t.get::<f64>("fp_area").unwrap(), [Some(1.0), None]);

        let err = t.add_column("fp_area", ColumnType::Int).unwrap_err();
        assert!(matches!(err, StagingError::TypeMismatch { .. }));
        assert!(matches!(
            t.add_column(StagingTable::ID_COLUMN, ColumnType::Text),
            Err(StagingError::Reserved(_))
        ));
    }

    #[test]
    fn typed_reads_reject_wrong_type() {
        let mut t = table(&["a"]);
        t.add_column("n", ColumnType::Int).unwrap();
        assert!(matches!(t.get::<f64>("n"), Err(StagingError::TypeMismatch { .. })));
        assert!(matches!(t.get::<i64>("missing"), Err(StagingError::ColumnNotFound(_))));
    }

    #[test]
    fn assign_by_id_leaves_unmatched_rows_null() {
        let mut t = table(&["a", "b", "c"]);
        t.add_column("label", ColumnType::Text).unwrap();
        let matched = t
            .assign_by_id("label", vec![("c", "x".to_string()), ("zz", "y".to_string())])
            .unwrap();
        assert_eq!(matched, 1);
        assert_eq!(
            t.get::<String>("label").unwrap(),
            [None, None, Some("x".to_string())]
        );
    }

    #[test]
    fn compute_par_matches_compute() {
        let mut t = table(&["a", "b", "c", "d"]);
        t.add_column("x", ColumnType::Int).unwrap();
        t.add_column("y", ColumnType::Int).unwrap();
        t.compute("x", |_, row| Some(row as i64 * 2)).unwrap();
        t.compute_par("y", |t, row| t.value::<i64>("x", row).unwrap().map(|v| v + 1))
            .unwrap();
        assert_eq!(t.get::<i64>("y").unwrap(), [Some(1), Some(3), Some(5), Some(7)]);
    }

    #[test]
    fn delete_rows_compacts_columns_and_ids() {
        let mut t = table(&["a", "b", "c"]);
        t.add_column("n", ColumnType::Int).unwrap();
        t.assign("n", vec![Some(1), None, Some(3)]).unwrap();

        let deleted = t.delete_rows(|t, row| t.value::<i64>("n", row).unwrap().is_none());
        assert_eq!(deleted, 1);
        assert_eq!(t.ids(), ["a", "c"]);
        assert_eq!(t.row_of("c"), Some(1));
        assert_eq!(t.row_of("b"), None);
        assert_eq!(t.get::<i64>("n").unwrap(), [Some(1), Some(3)]);
    }

    #[test]
    fn spatial_index_lifecycle() {
        let mut t = table(&["a", "b"]);
        t.add_column("geom", ColumnType::Polygon).unwrap();
        t.add_column("n", ColumnType::Int).unwrap();
        t.assign(
            "geom",
            vec![
                Some(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)]),
                None,
            ],
        )
        .unwrap();

        assert!(t.create_spatial_index("geom").unwrap());
        assert!(!t.create_spatial_index("geom").unwrap());
        assert_eq!(t.spatial_index("geom").unwrap().len(), 1);
        assert!(matches!(t.create_spatial_index("n"), Err(StagingError::NotGeometry(_))));

        let env = rstar::AABB::from_corners([1.0, 1.0], [2.0, 2.0]);
        let hits: Vec<usize> = t.spatial_index("geom").unwrap().candidates(&env).collect();
        assert_eq!(hits, vec![0]);

        // Reassigning the column invalidates the index.
        t.assign::<geo::Polygon<f64>>("geom", vec![None, None]).unwrap();
        assert!(t.spatial_index("geom").is_none());
    }

    #[test]
    fn multipolygon_index_spans_all_parts() {
        let mut t = table(&["a"]);
        t.add_column("parts", ColumnType::MultiPolygon).unwrap();
        let parts = geo::MultiPolygon::new(vec![
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0)],
        ]);
        t.assign("parts", vec![Some(parts)]).unwrap();
        assert!(t.create_spatial_index("parts").unwrap());

        let between = rstar::AABB::from_corners([3.0, 3.0], [3.5, 3.5]);
        let hits: Vec<usize> = t.spatial_index("parts").unwrap().candidates(&between).collect();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn drop_column_reports_presence() {
        let mut t = table(&["a"]);
        t.add_column("tmp", ColumnType::Float).unwrap();
        assert!(t.drop_column("tmp"));
        assert!(!t.drop_column("tmp"));
        assert!(t.require(["entity_id"]).is_ok());
        assert!(matches!(t.require(["tmp"]), Err(StagingError::ColumnNotFound(_))));
    }
}
