use crate::config::settings::ConnectionType;
use crate::domain::model::{Dataset, TableRef, WriteMode};
use crate::domain::ports::Warehouse;
use crate::utils::error::{EtlError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

const WRITE_ROWS_PER_PARTITION: usize = 10_000;
const MAX_WRITE_PARTITIONS: usize = 8;

/// 寫入時的分割數：超過一萬列才切，最多 8 份
pub fn write_partitions(rows: usize) -> usize {
    if rows > WRITE_ROWS_PER_PARTITION {
        (rows / WRITE_ROWS_PER_PARTITION).clamp(1, MAX_WRITE_PARTITIONS)
    } else {
        1
    }
}

/// 單一倉儲連線上的讀寫操作。所有錯誤都包成帶操作名稱的倉儲錯誤。
pub struct RedshiftConnector<W: Warehouse = Arc<dyn Warehouse>> {
    warehouse: W,
    connection_type: ConnectionType,
    parallelism: usize,
}

impl<W: Warehouse> RedshiftConnector<W> {
    pub fn new(warehouse: W, connection_type: ConnectionType) -> Self {
        tracing::info!("🔗 RedshiftConnector initialized");
        tracing::info!(
            "📋 Type: {} ({})",
            connection_type,
            connection_type.description()
        );
        Self {
            warehouse,
            connection_type,
            parallelism: 1,
        }
    }

    /// 以連線類型名稱建立 ("poc" / "cdp" / "jcap")
    pub fn with_type_name(warehouse: W, connection_type: &str) -> Result<Self> {
        Ok(Self::new(warehouse, connection_type.parse()?))
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub async fn read_table(
        &self,
        table_name: &str,
        schema: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Dataset> {
        let table = TableRef::new(table_name, schema);
        tracing::info!("📖 Reading from {} ({})", table, self.connection_type);

        let sql = match limit.filter(|n| *n > 0) {
            Some(n) => {
                tracing::info!("🔢 Applied limit: {}", n);
                format!("SELECT * FROM {} LIMIT {}", table, n)
            }
            None => format!("SELECT * FROM {}", table),
        };

        let data = self
            .warehouse
            .query(&sql)
            .await
            .map_err(|e| wrap("Read", e))?;
        tracing::info!("✅ Successfully read {} rows from {}", data.count(), table);
        Ok(data)
    }

    pub async fn execute_sql(&self, sql_query: &str) -> Result<Dataset> {
        tracing::info!("🔍 Executing SQL query ({})", self.connection_type);
        tracing::debug!("Query preview: {}...", preview(sql_query, 200));

        let wrapped = format!("SELECT * FROM ({}) AS spark_query", sql_query);
        let data = self
            .warehouse
            .query(&wrapped)
            .await
            .map_err(|e| wrap("SQL execution", e))?;
        tracing::info!("✅ Query executed successfully, returned {} rows", data.count());
        Ok(data)
    }

    pub async fn write_table(
        &self,
        data: &Dataset,
        table_name: &str,
        schema: Option<&str>,
        mode: WriteMode,
    ) -> Result<u64> {
        let table = TableRef::new(table_name, schema);
        let row_count = data.count();
        tracing::info!(
            "📝 Writing {} rows to {} (mode: {})",
            row_count,
            table,
            mode
        );

        if mode == WriteMode::Overwrite {
            self.truncate_table(table_name, schema)
                .await
                .map_err(|e| wrap("Write", e))?;
        }

        let partitions = data.clone().partition(write_partitions(row_count));
        let written: Vec<u64> = stream::iter(partitions.into_iter().map(|part| {
            let table = &table;
            async move { self.warehouse.insert(table, &part).await }
        }))
        .buffer_unordered(self.parallelism)
        .try_collect()
        .await
        .map_err(|e| wrap("Write", e))?;

        let written = written.iter().sum();
        tracing::info!("✅ Successfully wrote {} rows to {}", row_count, table);
        Ok(written)
    }

    /// 只處理 TRUNCATE；其他 DDL 略過並警告
    pub async fn execute_ddl(&self, sql_statement: &str) -> Result<bool> {
        tracing::info!("⚙️ Executing DDL ({})", self.connection_type);
        tracing::debug!("Statement: {}", sql_statement);

        if !sql_statement.to_uppercase().contains("TRUNCATE") {
            tracing::warn!(
                "⚠️ DDL operation skipped - not needed for ETL: {}",
                preview(sql_statement, 50)
            );
            return Ok(true);
        }

        let pattern = Regex::new(r"(?i)TRUNCATE\s+TABLE\s+(\S+)")
            .map_err(|e| EtlError::warehouse("DDL execution", e))?;
        let full_name = pattern
            .captures(sql_statement)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches(';').to_string())
            .ok_or_else(|| {
                EtlError::warehouse(
                    "DDL execution",
                    "Could not parse table name from TRUNCATE statement",
                )
            })?;

        let table = TableRef::parse(&full_name);
        self.truncate_table(&table.table, table.schema.as_deref())
            .await?;
        Ok(true)
    }

    pub async fn get_table_count(&self, table_name: &str, schema: Option<&str>) -> Result<u64> {
        let table = TableRef::new(table_name, schema);
        tracing::debug!("🔢 Getting count for {}", table);

        let data = self
            .execute_sql(&format!("SELECT COUNT(*) AS cnt FROM {}", table))
            .await
            .map_err(|e| wrap("Count", e))?;

        let count = data
            .rows
            .first()
            .and_then(|row| {
                data.resolve_column("cnt")
                    .and_then(|column| row.get(column))
            })
            .and_then(count_value)
            .ok_or_else(|| {
                EtlError::warehouse("Count", format!("no count returned for {}", table))
            })?;

        tracing::debug!("📊 {}: {} rows", table, count);
        Ok(count)
    }

    /// 先試 TRUNCATE TABLE，失敗再用 DELETE FROM
    pub async fn truncate_table(&self, table_name: &str, schema: Option<&str>) -> Result<()> {
        let table = TableRef::new(table_name, schema);
        tracing::info!("🗑️ Truncating {}", table);

        match self
            .warehouse
            .execute(&format!("TRUNCATE TABLE {}", table))
            .await
        {
            Ok(_) => {
                tracing::info!("✅ Successfully truncated {}", table);
                Ok(())
            }
            Err(truncate_error) => {
                tracing::warn!(
                    "⚠️ TRUNCATE failed, trying DELETE: {}",
                    truncate_error
                );
                self.warehouse
                    .execute(&format!("DELETE FROM {}", table))
                    .await
                    .map_err(|e| wrap("Truncate", e))?;
                tracing::info!("✅ Successfully truncated {} using DELETE", table);
                Ok(())
            }
        }
    }

    pub async fn copy_table_data(
        &self,
        source_table: &str,
        dest_table: &str,
        source_schema: Option<&str>,
        dest_schema: Option<&str>,
    ) -> Result<u64> {
        let source = TableRef::new(source_table, source_schema);
        let dest = TableRef::new(dest_table, dest_schema);
        tracing::info!("🔄 Copying {} → {}", source, dest);

        let data = self
            .read_table(source_table, source_schema, None)
            .await
            .map_err(|e| wrap("Copy", e))?;
        let rows_to_copy = data.count() as u64;

        self.write_table(&data, dest_table, dest_schema, WriteMode::Append)
            .await
            .map_err(|e| wrap("Copy", e))?;

        tracing::info!("✅ Successfully copied {} rows", rows_to_copy);
        Ok(rows_to_copy)
    }
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 保留最內層的倉儲錯誤訊息，外層加上操作名稱
fn wrap(operation: &str, error: EtlError) -> EtlError {
    tracing::error!("❌ {} operation failed: {}", operation, error);
    match error {
        EtlError::WarehouseError { message, .. } => EtlError::warehouse(operation, message),
        other => EtlError::warehouse(operation, other),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::warehouse::MemoryWarehouse;
    use serde_json::json;

    fn dataset(n: usize) -> Dataset {
        Dataset::from_rows(
            (0..n)
                .filter_map(|i| json!({"id": i, "name": format!("row-{}", i)}).as_object().cloned())
                .collect(),
        )
    }

    fn connector(warehouse: Arc<MemoryWarehouse>) -> RedshiftConnector<Arc<MemoryWarehouse>> {
        RedshiftConnector::new(warehouse, ConnectionType::Poc).with_parallelism(4)
    }

    #[test]
    fn test_write_partitions() {
        assert_eq!(write_partitions(10), 1);
        assert_eq!(write_partitions(10_000), 1);
        assert_eq!(write_partitions(25_000), 2);
        assert_eq!(write_partitions(1_000_000), 8);
    }

    #[test]
    fn test_invalid_connection_type() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let err = RedshiftConnector::with_type_name(warehouse, "prod").err().unwrap();
        assert!(err.to_string().contains("poc, cdp, jcap"));
    }

    #[tokio::test]
    async fn test_read_with_limit_and_count() {
        let warehouse = Arc::new(MemoryWarehouse::new().with_table("s.src", dataset(20)));
        let connector = connector(warehouse.clone());

        let data = connector.read_table("src", Some("s"), Some(5)).await.unwrap();
        assert_eq!(data.count(), 5);
        assert_eq!(connector.get_table_count("src", Some("s")).await.unwrap(), 20);
        assert!(warehouse
            .statements()
            .contains(&"SELECT * FROM (SELECT COUNT(*) AS cnt FROM s.src) AS spark_query".to_string()));
    }

    #[tokio::test]
    async fn test_overwrite_truncates_then_writes_partitions() {
        let warehouse = Arc::new(MemoryWarehouse::new().with_table("s.dst", dataset(3)));
        let connector = connector(warehouse.clone());

        let written = connector
            .write_table(&dataset(25_000), "dst", Some("s"), WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(written, 25_000);
        assert_eq!(warehouse.table("s.dst").unwrap().count(), 25_000);
        let inserts = warehouse
            .statements()
            .iter()
            .filter(|s| s.starts_with("INSERT INTO s.dst"))
            .count();
        assert_eq!(inserts, 2);
    }

    #[tokio::test]
    async fn test_truncate_falls_back_to_delete() {
        let warehouse = Arc::new(MemoryWarehouse::new().with_table("s.t", dataset(2)));
        warehouse.fail_on("TRUNCATE");
        let connector = connector(warehouse.clone());

        connector.truncate_table("t", Some("s")).await.unwrap();
        assert!(warehouse.table("s.t").unwrap().is_empty());
        assert!(warehouse.statements().contains(&"DELETE FROM s.t".to_string()));
    }

    #[tokio::test]
    async fn test_execute_ddl() {
        let warehouse = Arc::new(MemoryWarehouse::new().with_table("s.t", dataset(2)));
        let connector = connector(warehouse.clone());

        assert!(connector.execute_ddl("truncate table s.t;").await.unwrap());
        assert!(warehouse.table("s.t").unwrap().is_empty());
        assert!(connector.execute_ddl("CREATE TABLE x (a int)").await.unwrap());
        assert!(connector.execute_ddl("TRUNCATE s.t").await.is_err());
    }

    #[tokio::test]
    async fn test_copy_table_data() {
        let warehouse = Arc::new(
            MemoryWarehouse::new()
                .with_table("s.live", dataset(4))
                .with_table("s.bkp", Dataset::default()),
        );
        let connector = connector(warehouse.clone());

        let copied = connector
            .copy_table_data("live", "bkp", Some("s"), Some("s"))
            .await
            .unwrap();
        assert_eq!(copied, 4);
        assert_eq!(warehouse.table("s.bkp").unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_errors_carry_operation_name() {
        let connector = connector(Arc::new(MemoryWarehouse::new()));
        let err = connector.read_table("missing", None, None).await.unwrap_err();
        assert!(err.to_string().starts_with("Read failed"));
    }
}
