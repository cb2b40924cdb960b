//! Flat attribute tables exchanged with the loaders and writers.
//!
//! A [`Table`] is a list of named columns plus rows of [`Value`]s. Rows may
//! carry a geometry in the table's CRS, which merges keep from the left side.

use std::borrow::Cow;
use std::fmt;

use geo::Geometry;

use crate::crs::Crs;
use crate::models::types::{ProximityError, Result};

#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Number(f64),
}

impl Value {
    /// Key form used by equality joins. Nulls never match anything.
    pub fn as_key(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Self::Number(n) => Some(Cow::Owned(n.to_string())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Row {
    pub values: Vec<Value>,
    pub geometry: Option<Geometry>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
    crs: Option<Crs>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            crs: None,
        }
    }

    /// Declares the CRS of the row geometries.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ProximityError::UnknownColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.values.len() != self.columns.len() {
            return Err(ProximityError::RowWidth {
                expected: self.columns.len(),
                found: row.values.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Value at `row` in `column`; out-of-range rows read as null.
    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        const NULL: &Value = &Value::Null;
        let idx = self.column_index(column)?;
        Ok(self.rows.get(row).map(|r| &r.values[idx]).unwrap_or(NULL))
    }

    /// Keeps only `columns`, in the given order. Geometry is kept.
    pub fn select(&self, columns: &[&str]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>>>()?;

        Ok(Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| Row {
                    values: indices.iter().map(|&i| row.values[i].clone()).collect(),
                    geometry: row.geometry.clone(),
                })
                .collect(),
            crs: self.crs,
        })
    }

    /// Drops every listed column that exists; missing names are ignored.
    pub fn drop_columns(&self, columns: &[&str]) -> Table {
        let keep: Vec<&str> = self
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| !columns.contains(c))
            .collect();

        // Every kept name comes from self.columns
        self.select(&keep).unwrap_or_else(|_| self.clone())
    }

    pub fn rename(mut self, from: &str, to: &str) -> Result<Table> {
        let idx = self.column_index(from)?;
        self.columns[idx] = to.to_string();
        Ok(self)
    }

    /// Keeps the rows whose `column` value satisfies `predicate`.
    pub fn filter_by(&self, column: &str, predicate: impl Fn(&Value) -> bool) -> Result<Table> {
        let idx = self.column_index(column)?;

        Ok(Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(&row.values[idx]))
                .cloned()
                .collect(),
            crs: self.crs,
        })
    }
}
