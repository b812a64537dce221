use crate::config::settings::{ConnectionSettings, ConnectionType, Settings};
use crate::domain::model::{Dataset, Row, TableRef};
use crate::domain::ports::{Warehouse, WarehouseProvider};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use regex::Regex;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, FromQueryResult,
    JsonValue, Statement, TransactionTrait, Value as DbValue,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

pub const INSERT_BATCH_ROWS: usize = 500;
/// Postgres 協定一句最多 65535 個參數
pub const MAX_BIND_PARAMS: usize = 65_535;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Redshift 走 Postgres 協定
pub struct SeaOrmWarehouse {
    db: DatabaseConnection,
    statement_timeout: Duration,
}

impl SeaOrmWarehouse {
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let url = settings.connection_url()?;
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(8)
            .min_connections(1)
            .connect_timeout(CONNECT_TIMEOUT)
            .acquire_timeout(CONNECT_TIMEOUT)
            .sqlx_logging(false);

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            "Connecting to warehouse"
        );

        let db = Database::connect(opt)
            .await
            .map_err(|e| EtlError::warehouse("Connect", e))?;

        Ok(Self {
            db,
            statement_timeout: STATEMENT_TIMEOUT,
        })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            statement_timeout: STATEMENT_TIMEOUT,
        }
    }

    async fn with_timeout<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sea_orm::DbErr>>,
    {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result.map_err(|e| EtlError::warehouse(operation, e)),
            Err(_) => Err(EtlError::warehouse(
                operation,
                format!(
                    "statement timed out after {}s",
                    self.statement_timeout.as_secs()
                ),
            )),
        }
    }
}

#[async_trait]
impl Warehouse for SeaOrmWarehouse {
    async fn query(&self, sql: &str) -> Result<Dataset> {
        let statement = Statement::from_string(DbBackend::Postgres, sql.to_string());
        let values = self
            .with_timeout("Query", JsonValue::find_by_statement(statement).all(&self.db))
            .await?;

        let rows: Vec<Row> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Ok(Dataset::from_rows(rows))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let result = self
            .with_timeout("Execute", self.db.execute_unprepared(sql))
            .await?;
        Ok(result.rows_affected())
    }

    /// 同一次呼叫的所有批次在同一個交易內，失敗時整批回滾
    async fn insert(&self, table: &TableRef, data: &Dataset) -> Result<u64> {
        let batches = insert_batches(table, data, INSERT_BATCH_ROWS);
        if batches.is_empty() {
            return Ok(0);
        }

        let txn = self.with_timeout("Insert", self.db.begin()).await?;
        let mut written = 0;
        for batch in batches {
            let statement =
                Statement::from_sql_and_values(DbBackend::Postgres, batch.sql, batch.values);
            let result = self.with_timeout("Insert", txn.execute(statement)).await?;
            written += result.rows_affected();
        }
        self.with_timeout("Insert", txn.commit()).await?;
        Ok(written)
    }
}

/// 一句參數化的多列 INSERT
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub sql: String,
    pub values: Vec<DbValue>,
}

/// 多列 INSERT，每句至多 `batch_rows` 列，值一律用 `$n` 綁定
pub fn insert_batches(table: &TableRef, data: &Dataset, batch_rows: usize) -> Vec<InsertBatch> {
    if data.is_empty() || data.columns.is_empty() {
        return Vec::new();
    }

    let width = data.columns.len();
    let rows_per_batch = batch_rows.min(MAX_BIND_PARAMS / width).max(1);
    let columns = data
        .columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");

    data.rows
        .chunks(rows_per_batch)
        .map(|chunk| {
            let mut values = Vec::with_capacity(chunk.len() * width);
            let tuples = chunk
                .iter()
                .map(|row| {
                    let placeholders = data
                        .columns
                        .iter()
                        .map(|c| {
                            values.push(bind_value(row.get(c).unwrap_or(&Value::Null)));
                            format!("${}", values.len())
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", placeholders)
                })
                .collect::<Vec<_>>()
                .join(", ");
            InsertBatch {
                sql: format!("INSERT INTO {} ({}) VALUES {}", table, columns, tuples),
                values,
            }
        })
        .collect()
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.to_lowercase().replace('"', "\"\""))
}

pub fn bind_value(value: &Value) -> DbValue {
    match value {
        Value::Null => DbValue::String(None),
        Value::Bool(b) => DbValue::from(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => DbValue::from(i),
            (None, Some(f)) => DbValue::from(f),
            (None, None) => DbValue::from(n.to_string()),
        },
        Value::String(s) => DbValue::from(s.clone()),
        other => DbValue::from(other.to_string()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 行程內的倉儲：本機模擬資料模式與測試使用。
/// 只認得連接器會送出的幾種 SQL，其他查詢要先用 `register_query` 登記結果。
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Dataset>>,
    canned: Mutex<Vec<(String, Dataset)>>,
    statements: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

struct Patterns {
    wrapped: Regex,
    count: Regex,
    select: Regex,
    truncate: Regex,
    delete: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| EtlError::processing(format!("Invalid pattern: {}", e)))
        };
        Ok(Self {
            wrapped: compile(r"(?is)^SELECT \* FROM \((.*)\) AS spark_query$")?,
            count: compile(r"(?i)^SELECT COUNT\(\*\) AS cnt FROM (\S+)$")?,
            select: compile(r"(?i)^SELECT \* FROM (\S+)(?: LIMIT (\d+))?$")?,
            truncate: compile(r"(?i)^TRUNCATE TABLE (\S+)$")?,
            delete: compile(r"(?i)^DELETE FROM (\S+)$")?,
        })
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn table_key(name: &str) -> String {
    name.trim_matches('"').to_lowercase()
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// 本機沒有倉儲連線時的範例資料
    pub fn with_sample_data() -> Self {
        let rows = [
            ("OPSUMIT", 100_001, "2025-01-06"),
            ("OPSUMIT", 100_002, "2025-01-13"),
            ("UPTRAVI", 100_003, "2025-02-03"),
            ("OPSUMIT", 100_004, "2025-02-17"),
            ("UPTRAVI", 100_005, "2025-03-10"),
        ]
        .iter()
        .filter_map(|(product, ac_number, referral_date)| {
            json!({
                "product": product,
                "ac_number": ac_number,
                "referral_date": referral_date,
                "patient_status": "ACTIVE",
            })
            .as_object()
            .cloned()
        })
        .collect();

        Self::new().with_table("dna_actln_dwh.vw_patients_opsumit_cap", Dataset::from_rows(rows))
    }

    pub fn with_table(self, name: &str, data: Dataset) -> Self {
        self.set_table(name, data);
        self
    }

    pub fn set_table(&self, name: &str, data: Dataset) {
        lock(&self.tables).insert(table_key(name), data);
    }

    pub fn table(&self, name: &str) -> Option<Dataset> {
        lock(&self.tables).get(&table_key(name)).cloned()
    }

    pub fn register_query(&self, sql: &str, result: Dataset) {
        lock(&self.canned).push((normalize(sql), result));
    }

    /// 以此開頭的語句一律失敗 (測試錯誤路徑用)
    pub fn fail_on(&self, prefix: &str) {
        lock(&self.failing).push(prefix.to_uppercase());
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn record(&self, operation: &str, sql: &str) -> Result<String> {
        let sql = normalize(sql);
        lock(&self.statements).push(sql.clone());
        let upper = sql.to_uppercase();
        if lock(&self.failing).iter().any(|p| upper.starts_with(p)) {
            return Err(EtlError::warehouse(
                operation,
                format!("statement rejected: {}", sql),
            ));
        }
        Ok(sql)
    }

    fn run_query(&self, sql: &str, patterns: &Patterns) -> Result<Dataset> {
        if let Some((_, result)) = lock(&self.canned).iter().find(|(q, _)| q == sql) {
            return Ok(result.clone());
        }

        if let Some(caps) = patterns.wrapped.captures(sql) {
            return self.run_query(caps[1].trim(), patterns);
        }

        if let Some(caps) = patterns.count.captures(sql) {
            let count = self.existing_table(&caps[1])?.count();
            let mut row = Row::new();
            row.insert("cnt".to_string(), json!(count));
            return Ok(Dataset::from_rows(vec![row]));
        }

        if let Some(caps) = patterns.select.captures(sql) {
            let table = self.existing_table(&caps[1])?;
            return Ok(match caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                Some(limit) => table.limit(limit),
                None => table,
            });
        }

        Err(EtlError::warehouse(
            "Query",
            format!("no result registered for query: {}", sql),
        ))
    }

    fn existing_table(&self, name: &str) -> Result<Dataset> {
        self.table(name).ok_or_else(|| {
            EtlError::warehouse("Query", format!("relation \"{}\" does not exist", name))
        })
    }

    fn clear_table(&self, name: &str) -> Result<u64> {
        let mut tables = lock(&self.tables);
        match tables.get_mut(&table_key(name)) {
            Some(table) => {
                let removed = table.count() as u64;
                table.rows.clear();
                Ok(removed)
            }
            None => Err(EtlError::warehouse(
                "Execute",
                format!("relation \"{}\" does not exist", name),
            )),
        }
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn query(&self, sql: &str) -> Result<Dataset> {
        let sql = self.record("Query", sql)?;
        self.run_query(&sql, &Patterns::new()?)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let sql = self.record("Execute", sql)?;
        let patterns = Patterns::new()?;

        if let Some(caps) = patterns.truncate.captures(&sql) {
            return self.clear_table(&caps[1]);
        }
        if let Some(caps) = patterns.delete.captures(&sql) {
            return self.clear_table(&caps[1]);
        }
        Err(EtlError::warehouse(
            "Execute",
            format!("unsupported statement: {}", sql),
        ))
    }

    async fn insert(&self, table: &TableRef, data: &Dataset) -> Result<u64> {
        self.record("Insert", &format!("INSERT INTO {}", table))?;

        let mut tables = lock(&self.tables);
        let target = tables
            .entry(table_key(&table.to_string()))
            .or_insert_with(|| data.empty_like());
        if target.columns.is_empty() {
            target.columns = data.columns.clone();
        }
        target.rows.extend(data.rows.iter().cloned());
        Ok(data.count() as u64)
    }
}

/// 依設定延遲建立各連線並快取。
/// 本機模式下沒設定的連線改用範例資料 (模擬資料模式)。
pub struct ConfiguredWarehouses {
    settings: Settings,
    mock_fallback: bool,
    cache: AsyncMutex<HashMap<ConnectionType, Arc<dyn Warehouse>>>,
}

impl ConfiguredWarehouses {
    pub fn new(settings: Settings, mock_fallback: bool) -> Self {
        Self {
            settings,
            mock_fallback,
            cache: AsyncMutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WarehouseProvider for ConfiguredWarehouses {
    async fn warehouse(&self, kind: ConnectionType) -> Result<Arc<dyn Warehouse>> {
        let mut cache = self.cache.lock().await;
        if let Some(existing) = cache.get(&kind) {
            return Ok(existing.clone());
        }

        let warehouse: Arc<dyn Warehouse> = match self.settings.connection(kind) {
            Ok(conn) => {
                tracing::info!("🔗 Using {} connection: {}", kind.description(), conn.jdbc_url());
                Arc::new(SeaOrmWarehouse::connect(conn).await?)
            }
            Err(_) if self.mock_fallback => {
                tracing::warn!(
                    "⚠️ No {} connection configured - using mock data mode",
                    kind.description()
                );
                Arc::new(MemoryWarehouse::with_sample_data())
            }
            Err(e) => return Err(e),
        };

        cache.insert(kind, warehouse.clone());
        Ok(warehouse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{MockDatabase, MockExecResult};

    fn rows(values: Vec<Value>) -> Dataset {
        Dataset::from_rows(values.into_iter().filter_map(|v| v.as_object().cloned()).collect())
    }

    #[test]
    fn test_bind_values() {
        assert_eq!(bind_value(&Value::Null), DbValue::String(None));
        assert_eq!(bind_value(&json!(true)), DbValue::from(true));
        assert_eq!(bind_value(&json!(42)), DbValue::from(42i64));
        assert_eq!(bind_value(&json!(1.5)), DbValue::from(1.5f64));
        assert_eq!(bind_value(&json!("O'Brien")), DbValue::from("O'Brien"));
        assert_eq!(quote_identifier("PA_CompletedDate"), "\"pa_completeddate\"");
    }

    #[test]
    fn test_insert_values_are_bound_in_row_order() {
        let data = rows(vec![
            json!({"id": 1, "path": "C:\\"}),
            json!({"id": 2, "path": "x'); DROP TABLE t; --"}),
            json!({"id": 3}),
        ]);
        let batches = insert_batches(&TableRef::new("t", Some("s")), &data, INSERT_BATCH_ROWS);

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].sql,
            "INSERT INTO s.t (\"id\", \"path\") VALUES ($1, $2), ($3, $4), ($5, $6)"
        );
        // 值原樣綁定，不經過字串跳脫
        assert_eq!(
            batches[0].values,
            vec![
                DbValue::from(1i64),
                DbValue::from("C:\\"),
                DbValue::from(2i64),
                DbValue::from("x'); DROP TABLE t; --"),
                DbValue::from(3i64),
                DbValue::String(None),
            ]
        );
    }

    #[test]
    fn test_insert_batches_respect_row_and_param_limits() {
        let data = rows((0..1200).map(|i| json!({"id": i, "name": "x"})).collect());
        let batches = insert_batches(&TableRef::new("t", Some("s")), &data, INSERT_BATCH_ROWS);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].values.len(), 1000);
        assert!(batches[2].sql.ends_with("($399, $400)"));
        assert!(insert_batches(&TableRef::new("t", None), &data.empty_like(), 500).is_empty());

        // 欄位多時每句列數改由參數上限決定
        let wide: Vec<Row> = (0..400)
            .map(|i| (0..200).map(|c| (format!("c{}", c), json!(i))).collect())
            .collect();
        let batches = insert_batches(&TableRef::new("w", None), &Dataset::from_rows(wide), 500);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].values.len(), 327 * 200);
        assert!(batches.iter().all(|b| b.values.len() <= MAX_BIND_PARAMS));
    }

    #[tokio::test]
    async fn test_insert_batches_share_one_transaction() {
        let db = MockDatabase::new(DbBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 500,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 100,
                },
            ])
            .into_connection();
        let warehouse = SeaOrmWarehouse::from_connection(db);

        let data = rows((0..600).map(|i| json!({"id": i})).collect());
        let written = warehouse
            .insert(&TableRef::new("t", Some("s")), &data)
            .await
            .unwrap();
        assert_eq!(written, 600);

        // 兩個批次記在同一筆交易裡
        assert_eq!(warehouse.db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_warehouse_select_count_and_limit() {
        let warehouse = MemoryWarehouse::with_sample_data();
        let all = warehouse
            .query("SELECT * FROM dna_actln_dwh.vw_patients_opsumit_cap")
            .await
            .unwrap();
        assert_eq!(all.count(), 5);

        let limited = warehouse
            .query("SELECT * FROM dna_actln_dwh.vw_patients_opsumit_cap LIMIT 2")
            .await
            .unwrap();
        assert_eq!(limited.count(), 2);

        let count = warehouse
            .query("SELECT * FROM (SELECT COUNT(*) AS cnt FROM dna_actln_dwh.vw_patients_opsumit_cap) AS spark_query")
            .await
            .unwrap();
        assert_eq!(count.rows[0]["cnt"], json!(5));
    }

    #[tokio::test]
    async fn test_memory_warehouse_insert_truncate_and_failures() {
        let warehouse = MemoryWarehouse::new();
        let table = TableRef::new("dest", Some("public"));
        let inserted = warehouse
            .insert(&table, &rows(vec![json!({"a": 1}), json!({"a": 2})]))
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(warehouse.table("public.dest").unwrap().count(), 2);

        assert_eq!(warehouse.execute("TRUNCATE TABLE public.dest").await.unwrap(), 2);
        assert!(warehouse.table("public.dest").unwrap().is_empty());

        warehouse.fail_on("TRUNCATE");
        assert!(warehouse.execute("TRUNCATE TABLE public.dest").await.is_err());
        assert!(warehouse.execute("DELETE FROM public.dest").await.is_ok());
        assert!(warehouse.query("SELECT * FROM missing").await.is_err());
    }

    #[tokio::test]
    async fn test_registered_query_result() {
        let warehouse = MemoryWarehouse::new();
        warehouse.register_query("SELECT a\n  FROM b", rows(vec![json!({"a": 1})]));
        let result = warehouse
            .query("SELECT * FROM (SELECT a FROM b) AS spark_query")
            .await
            .unwrap();
        assert_eq!(result.count(), 1);
    }

    #[tokio::test]
    async fn test_configured_warehouses_mock_fallback() {
        let settings = Settings::from_sources(&HashMap::new(), &HashMap::new()).unwrap();

        let local = ConfiguredWarehouses::new(settings.clone(), true);
        let first = local.warehouse(ConnectionType::Poc).await.unwrap();
        let second = local.warehouse(ConnectionType::Poc).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let sample = first
            .query("SELECT * FROM dna_actln_dwh.vw_patients_opsumit_cap")
            .await
            .unwrap();
        assert_eq!(sample.count(), 5);

        let cluster = ConfiguredWarehouses::new(settings, false);
        let err = cluster.warehouse(ConnectionType::Cdp).await.err().unwrap();
        assert!(err.to_string().contains("CDP_REDSHIFT_HOST"));
    }
}
