//! Columnar annotation tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::lazy::{Lazy, LoadState};
use crate::error::{Result, SpatialDataError};

/// Logical type of a table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    Str,
    Categorical,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Str => "str",
            ColumnType::Categorical => "categorical",
        };
        write!(f, "{}", s)
    }
}

/// One typed column.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
    /// Values stored as codes into `categories`.
    Categorical {
        categories: Vec<String>,
        codes: Vec<u32>,
    },
}

impl Column {
    /// Builds a categorical column from string values, assigning categories
    /// in first-seen order.
    pub fn categorical<S: AsRef<str>>(values: &[S]) -> Self {
        let mut categories: Vec<String> = Vec::new();
        let codes = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                match categories.iter().position(|c| c == v) {
                    Some(i) => i as u32,
                    None => {
                        categories.push(v.to_string());
                        (categories.len() - 1) as u32
                    }
                }
            })
            .collect();
        Column::Categorical { categories, codes }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Int(_) => ColumnType::Int,
            Column::Float(_) => ColumnType::Float,
            Column::Str(_) => ColumnType::Str,
            Column::Categorical { .. } => ColumnType::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer value at `row`, if this is an integer column.
    pub fn get_i64(&self, row: usize) -> Option<i64> {
        match self {
            Column::Int(v) => v.get(row).copied(),
            _ => None,
        }
    }

    /// String value at `row` for string and categorical columns.
    pub fn get_str(&self, row: usize) -> Option<&str> {
        match self {
            Column::Str(v) => v.get(row).map(String::as_str),
            Column::Categorical { categories, codes } => codes
                .get(row)
                .and_then(|c| categories.get(*c as usize))
                .map(String::as_str),
            _ => None,
        }
    }

    /// Cell at `row` rendered as text.
    pub fn format_cell(&self, row: usize) -> String {
        match self {
            Column::Int(v) => v[row].to_string(),
            Column::Float(v) => v[row].to_string(),
            Column::Str(_) | Column::Categorical { .. } => {
                self.get_str(row).unwrap_or_default().to_string()
            }
        }
    }

    /// Keeps the rows at `rows`, in order. Categories are preserved.
    pub fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Int(v) => Column::Int(rows.iter().map(|&r| v[r]).collect()),
            Column::Float(v) => Column::Float(rows.iter().map(|&r| v[r]).collect()),
            Column::Str(v) => Column::Str(rows.iter().map(|&r| v[r].clone()).collect()),
            Column::Categorical { categories, codes } => Column::Categorical {
                categories: categories.clone(),
                codes: rows.iter().map(|&r| codes[r]).collect(),
            },
        }
    }

    /// Appends `other` below `self`. Categorical columns merge categories.
    pub fn concat(&self, other: &Column) -> Result<Column> {
        Ok(match (self, other) {
            (Column::Int(a), Column::Int(b)) => Column::Int([a.as_slice(), b.as_slice()].concat()),
            (Column::Float(a), Column::Float(b)) => Column::Float([a.as_slice(), b.as_slice()].concat()),
            (Column::Str(a), Column::Str(b)) => Column::Str([a.as_slice(), b.as_slice()].concat()),
            (Column::Categorical { .. }, Column::Categorical { .. })
            | (Column::Categorical { .. }, Column::Str(_))
            | (Column::Str(_), Column::Categorical { .. }) => {
                let values: Vec<&str> = (0..self.len())
                    .filter_map(|r| self.get_str(r))
                    .chain((0..other.len()).filter_map(|r| other.get_str(r)))
                    .collect();
                Column::categorical(&values)
            }
            (a, b) => {
                return Err(SpatialDataError::invalid_element(
                    "<table>",
                    format!(
                        "cannot concatenate {} column with {} column",
                        a.column_type(),
                        b.column_type()
                    ),
                ))
            }
        })
    }
}

/// A table of named, equally long, typed columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnarTable {
    columns: Vec<(String, Column)>,
    n_rows: usize,
}

impl ColumnarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    ///
    /// # Errors
    /// `InvalidElement` on a repeated name or a length mismatch.
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(SpatialDataError::invalid_element(
                "<table>",
                format!("duplicate column '{}'", name),
            ));
        }
        if !self.columns.is_empty() && column.len() != self.n_rows {
            return Err(SpatialDataError::invalid_element(
                "<table>",
                format!(
                    "column '{}' has {} rows, table has {}",
                    name,
                    column.len(),
                    self.n_rows
                ),
            ));
        }
        self.n_rows = column.len();
        self.columns.push((name, column));
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Column names and types.
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|(n, c)| (n.clone(), c.column_type()))
            .collect()
    }

    /// Keeps the rows in `rows` (deduplicated, in ascending order). An empty
    /// selection keeps the schema.
    pub fn filter_rows(&self, rows: &BTreeSet<usize>) -> ColumnarTable {
        let rows: Vec<usize> = rows.iter().copied().filter(|&r| r < self.n_rows).collect();
        ColumnarTable {
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.take(&rows)))
                .collect(),
            n_rows: rows.len(),
        }
    }

    /// Stacks tables with the same column names and types.
    pub fn concat(&self, other: &ColumnarTable) -> Result<ColumnarTable> {
        if self.columns.is_empty() {
            return Ok(other.clone());
        }
        if other.columns.is_empty() {
            return Ok(self.clone());
        }
        let mut out = ColumnarTable::new();
        for (name, column) in &self.columns {
            let other_col = other.column(name).ok_or_else(|| {
                SpatialDataError::invalid_element(
                    "<table>",
                    format!("column '{}' missing from one of the tables", name),
                )
            })?;
            out = out.with_column(name.clone(), column.concat(other_col)?)?;
        }
        if other.n_columns() != self.n_columns() {
            return Err(SpatialDataError::invalid_element(
                "<table>",
                "tables have different column sets",
            ));
        }
        Ok(out)
    }
}

/// Which elements a table's rows describe, and through which columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationTarget {
    /// Names of the annotated Labels, Shapes or Points elements.
    pub regions: Vec<String>,
    /// Column naming the region each row belongs to.
    pub region_key: String,
    /// Integer column holding the geometry or label id each row describes.
    pub instance_key: String,
}

impl AnnotationTarget {
    pub fn new(
        regions: &[&str],
        region_key: impl Into<String>,
        instance_key: impl Into<String>,
    ) -> Self {
        Self {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            region_key: region_key.into(),
            instance_key: instance_key.into(),
        }
    }

    pub fn annotates(&self, element: &str) -> bool {
        self.regions.iter().any(|r| r == element)
    }
}

/// How many table rows may describe one geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityPolicy {
    /// Each geometry is described by at most one row.
    OneToOne,
    /// Several rows may describe the same geometry.
    #[default]
    ManyToOne,
}

/// A table element: columnar data plus an optional annotation target.
#[derive(Clone, Debug)]
pub struct Table {
    data: Lazy<ColumnarTable>,
    annotation: Option<AnnotationTarget>,
}

impl Table {
    /// A table that annotates nothing.
    pub fn new(data: ColumnarTable) -> Self {
        Self {
            data: Lazy::loaded(data),
            annotation: None,
        }
    }

    /// A table whose rows describe geometries of `target`.
    pub fn annotating(data: ColumnarTable, target: AnnotationTarget) -> Self {
        Self {
            data: Lazy::loaded(data),
            annotation: Some(target),
        }
    }

    /// A table backed by deferred data.
    pub fn lazy(data: Lazy<ColumnarTable>, annotation: Option<AnnotationTarget>) -> Self {
        Self { data, annotation }
    }

    /// The table data, loading it on first access.
    pub fn data(&self) -> Result<std::sync::Arc<ColumnarTable>> {
        self.data.get()
    }

    pub fn load_state(&self) -> LoadState {
        self.data.state()
    }

    pub fn annotation(&self) -> Option<&AnnotationTarget> {
        self.annotation.as_ref()
    }

    pub fn set_annotation(&mut self, annotation: Option<AnnotationTarget>) {
        self.annotation = annotation;
    }

    /// Rows annotating `region`, keyed by instance id.
    ///
    /// Returns `(row, instance_id)` pairs. Rows without a usable key are
    /// skipped.
    pub fn rows_for_region(&self, region: &str) -> Result<Vec<(usize, i64)>> {
        let Some(target) = &self.annotation else {
            return Ok(Vec::new());
        };
        let data = self.data()?;
        let (Some(regions), Some(instances)) = (
            data.column(&target.region_key),
            data.column(&target.instance_key),
        ) else {
            return Ok(Vec::new());
        };
        Ok((0..data.n_rows())
            .filter(|&r| regions.get_str(r) == Some(region))
            .filter_map(|r| instances.get_i64(r).map(|id| (r, id)))
            .collect())
    }
}
