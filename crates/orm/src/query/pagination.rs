//! Paged and tabular raw-SQL results

use serde::Serialize;

use crate::backends::{DatabaseRow, DatabaseValue};
use crate::error::{ModelError, OrmResult};

/// One page of a raw-SQL query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationResult<T> {
    pub items: Vec<T>,
    /// Rows matched by the unpaged query
    pub total: u64,
    /// 1-based page index
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T> PaginationResult<T> {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// Validate a 1-based page request and return its offset
pub(crate) fn page_offset(page: u64, page_size: u64) -> OrmResult<u64> {
    if page == 0 {
        return Err(ModelError::Validation("Page index starts at 1".to_string()));
    }
    if page_size == 0 {
        return Err(ModelError::Validation("Page size must be positive".to_string()));
    }
    (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| {
            ModelError::Validation(format!("Page {} of size {} is out of range", page, page_size))
        })
}

pub(crate) fn total_pages(total: u64, page_size: u64) -> u64 {
    total.div_ceil(page_size)
}

/// Untyped tabular result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DatabaseValue>>,
}

impl DataTable {
    pub(crate) fn from_rows(rows: Vec<Box<dyn DatabaseRow>>) -> OrmResult<Self> {
        let columns = rows.first().map(|row| row.column_names()).unwrap_or_default();
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.column_count());
            for index in 0..row.column_count() {
                cells.push(row.get_by_index(index)?);
            }
            values.push(cells);
        }
        Ok(Self { columns, rows: values })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Cell at `row`, `column`
    pub fn value(&self, row: usize, column: &str) -> Option<&DatabaseValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }
}
