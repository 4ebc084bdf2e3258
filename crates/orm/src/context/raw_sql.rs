//! Raw SQL and bulk operations

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::DbContext;
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::entity::{entity_values, project_row};
use crate::model::Entity;
use crate::query::pagination::{page_offset, total_pages, DataTable, PaginationResult};
use crate::query::sql::{self, push_limit_offset, SqlWriter};
use crate::query::types::OrderBy;

impl DbContext {
    /// Run a statement and return the number of affected rows
    pub async fn execute_sql_with_non_query(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<u64> {
        self.execute(sql, params).await
    }

    /// Like `execute_sql_with_non_query`, abandoning the statement once `token` is cancelled
    pub async fn execute_sql_with_non_query_cancellable(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        token: &CancellationToken,
    ) -> OrmResult<u64> {
        if token.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ModelError::Cancelled),
            result = self.execute(sql, params) => result,
        }
    }

    /// Raw query against `T`'s set, projected into `V`
    pub async fn sql_query<T: Entity, V: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<V>> {
        let entity_type = self.model.entity_type::<T>()?;
        let rows = self.fetch_all(sql, params).await?;
        rows.iter().map(|row| project_row(row.as_ref(), Some(entity_type))).collect()
    }

    /// One page of a raw query against `T`'s set; `page` is 1-based
    pub async fn sql_query_paged<T: Entity, V: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        order_by: &[OrderBy],
        page: u64,
        page_size: u64,
    ) -> OrmResult<PaginationResult<V>> {
        let entity_type = self.model.entity_type::<T>()?;
        let offset = page_offset(page, page_size)?;
        let inner = sql.trim().trim_end_matches(';');

        let count_sql = format!("SELECT COUNT(*) FROM ({}) weft_page", inner);
        let total = self.fetch_count(&count_sql, params).await?;

        let mut w = SqlWriter::with_params(self.dialect(), params.to_vec());
        w.push("SELECT * FROM (").push(inner).push(") weft_page");
        if !order_by.is_empty() {
            w.push(" ORDER BY ");
            for (i, term) in order_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_identifier(&term.column).push(&format!(" {}", term.direction));
            }
        }
        push_limit_offset(&mut w, Some(to_i64(page_size)?), Some(to_i64(offset)?));
        let (page_sql, page_params) = w.finish();

        let rows = self.fetch_all(&page_sql, &page_params).await?;
        let items = rows
            .iter()
            .map(|row| project_row(row.as_ref(), Some(entity_type)))
            .collect::<OrmResult<Vec<V>>>()?;

        Ok(PaginationResult {
            items,
            total,
            page,
            page_size,
            total_pages: total_pages(total, page_size),
        })
    }

    /// Untyped tabular result of a raw query
    pub async fn get_data_table(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<DataTable> {
        let rows = self.fetch_all(sql, params).await?;
        DataTable::from_rows(rows)
    }

    /// One table per result set of a multi-statement batch, in statement order
    pub async fn get_data_tables(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<DataTable>> {
        let sets = self.fetch_result_sets(sql, params).await?;
        sets.into_iter().map(DataTable::from_rows).collect()
    }

    /// Insert `entities` in chunks inside one transaction.
    ///
    /// Only backends with bulk-copy support accept this; others fail before
    /// any statement runs.
    pub async fn bulk_insert<T: Entity>(
        &self,
        entities: &[T],
        destination_table: Option<&str>,
    ) -> OrmResult<u64> {
        let backend = self.pool.backend_type();
        if !backend.supports_bulk_copy() {
            return Err(ModelError::UnsupportedBackend {
                operation: "bulk_insert".to_string(),
                backend: backend.to_string(),
            });
        }

        let entity_type = self.model.entity_type::<T>()?;
        if entities.is_empty() {
            return Ok(0);
        }
        let table = destination_table.unwrap_or(entity_type.table_name());
        let rows = entities
            .iter()
            .map(|entity| entity_values(entity, entity_type))
            .collect::<OrmResult<Vec<_>>>()?;
        let statements = sql::insert_batches(self.dialect(), entity_type, table, &rows)?;

        let inserted = self.execute_batch(&statements).await?;
        info!(
            "Bulk inserted {} rows into {} in {} statements",
            inserted,
            table,
            statements.len()
        );
        Ok(inserted)
    }
}

fn to_i64(value: u64) -> OrmResult<i64> {
    i64::try_from(value).map_err(|_| ModelError::Validation(format!("{} is out of range", value)))
}
