//! Rows and result sets.
//!
//! A row holds decoded values next to a shared handle on the column list of
//! its result set, so every row of one set points at the same metadata.

use std::sync::Arc;

use tds_protocol::ColumnInfo;
use tds_types::{FromSql, SqlValue, TypeError};

/// Column list shared by all rows of a result set.
pub type Columns = Arc<Vec<ColumnInfo>>;

/// One decoded row.
#[derive(Clone, PartialEq)]
pub struct Row {
    columns: Columns,
    values: Vec<SqlValue>,
}

impl Row {
    /// Pair values with their column list.
    ///
    /// The two must have the same length.
    pub fn new(columns: Columns, values: Vec<SqlValue>) -> Result<Self, TypeError> {
        if columns.len() != values.len() {
            return Err(TypeError::Truncation(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Pair values decoded one per column.
    pub(crate) fn from_decoded(columns: Columns, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get a value converted to a Rust type.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        let value = self.values.get(index).ok_or(TypeError::OutOfRange {
            target_type: "column index",
        })?;
        T::from_sql(value)
    }

    /// Get a value by column name (case-insensitive).
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self.find(name).ok_or(TypeError::OutOfRange {
            target_type: "column name",
        })?;
        self.get(index)
    }

    /// Get a value, returning `None` when NULL or not convertible.
    pub fn try_get<T: FromSql>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_sql_nullable(v).ok().flatten())
    }

    /// Get the raw value.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Check whether a column is NULL; out-of-range indices count as NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(SqlValue::is_null)
    }

    /// Position of a column by name (case-insensitive).
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Decoded values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.entry(&column.name, value);
        }
        map.finish()
    }
}

/// Every row of one statement together with its completion count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column list; empty for statements that return no rows.
    pub columns: Columns,
    /// Rows in arrival order.
    pub rows: Vec<Row>,
    /// Records affected as reported by the done token, if any arrived.
    pub records_affected: Option<i32>,
}

impl ResultSet {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the set holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}
