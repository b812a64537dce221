use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Local};
use comfy_table::{presets::ASCII_FULL, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type Row = Map<String, Value>;

/// 有欄位順序的表格資料，對應 Spark DataFrame 的最小子集。
/// 欄位名稱比對不分大小寫。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// 從資料列建立，欄位順序取第一列
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn resolve_column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.resolve_column(name).is_some()
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.rows.truncate(n);
        self
    }

    /// 新增或取代欄位 (常數值)
    pub fn with_column(self, name: &str, value: Value) -> Self {
        self.map_column_as(name, name, move |_| value.clone())
    }

    /// 以函數改寫欄位；欄位不存在時以 Null 作為輸入並新增於最後
    pub fn map_column<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Value,
    {
        self.map_column_as(name, name, f)
    }

    fn map_column_as<F>(mut self, existing: &str, new_name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Value,
    {
        let resolved = self.resolve_column(existing).map(str::to_string);

        match resolved {
            Some(old) => {
                if let Some(slot) = self.columns.iter_mut().find(|c| **c == old) {
                    *slot = new_name.to_string();
                }
                for row in self.rows.iter_mut() {
                    let current = row.get(&old).cloned().unwrap_or(Value::Null);
                    let updated = f(&current);
                    if old == new_name {
                        row.insert(old.clone(), updated);
                    } else {
                        rename_key(row, &old, new_name, updated);
                    }
                }
            }
            None => {
                self.columns.push(new_name.to_string());
                for row in self.rows.iter_mut() {
                    row.insert(new_name.to_string(), f(&Value::Null));
                }
            }
        }
        self
    }

    /// 欄位不存在時不做任何事
    pub fn with_column_renamed(self, existing: &str, new_name: &str) -> Self {
        if !self.has_column(existing) {
            return self;
        }
        self.map_column_as(existing, new_name, Value::clone)
    }

    pub fn select(&self, columns: &[&str]) -> Result<Self> {
        let mut resolved = Vec::with_capacity(columns.len());
        for name in columns {
            let column = self.resolve_column(name).ok_or_else(|| {
                EtlError::processing(format!(
                    "Cannot resolve column '{}' given input columns: [{}]",
                    name,
                    self.columns.join(", ")
                ))
            })?;
            resolved.push(column.to_string());
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                resolved
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect::<Row>()
            })
            .collect();

        Ok(Self {
            columns: resolved,
            rows,
        })
    }

    /// 依欄位值的 JSON 型別推斷 schema；全為 Null 的欄位為 "null"
    pub fn schema(&self) -> Vec<(String, &'static str)> {
        self.columns
            .iter()
            .map(|column| {
                let kind = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(column))
                    .find(|v| !v.is_null())
                    .map(json_type_name)
                    .unwrap_or("null");
                (column.clone(), kind)
            })
            .collect()
    }

    /// 切成至多 `n` 份，保留欄位
    pub fn partition(self, n: usize) -> Vec<Dataset> {
        let n = n.max(1);
        if self.rows.len() <= 1 || n == 1 {
            return vec![self];
        }
        let chunk = self.rows.len().div_ceil(n);
        let columns = self.columns;
        let mut rows = self.rows;
        let mut parts = Vec::with_capacity(n);
        while !rows.is_empty() {
            let rest = rows.split_off(chunk.min(rows.len()));
            parts.push(Dataset::new(columns.clone(), rows));
            rows = rest;
        }
        parts
    }

    /// 類似 DataFrame.show(n, truncate=False)
    pub fn show(&self, n: usize) -> String {
        let mut table = Table::new();
        table.load_preset(ASCII_FULL);
        table.set_header(self.columns.clone());
        for row in self.rows.iter().take(n) {
            table.add_row(
                self.columns
                    .iter()
                    .map(|c| display_value(row.get(c).unwrap_or(&Value::Null))),
            );
        }
        let mut rendered = table.to_string();
        if self.rows.len() > n {
            rendered.push_str(&format!("\nonly showing top {} rows", n));
        }
        rendered
    }
}

fn rename_key(row: &mut Row, old: &str, new_name: &str, value: Value) {
    // 保留欄位位置
    let entries: Vec<(String, Value)> = std::mem::take(row).into_iter().collect();
    for (key, existing) in entries {
        if key == old {
            row.insert(new_name.to_string(), value.clone());
        } else {
            row.insert(key, existing);
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "bigint",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "struct",
    }
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn new(table: &str, schema: Option<&str>) -> Self {
        Self {
            schema: schema.filter(|s| !s.is_empty()).map(str::to_string),
            table: table.to_string(),
        }
    }

    /// 解析 "schema.table" 或 "table"
    pub fn parse(full_name: &str) -> Self {
        match full_name.split_once('.') {
            Some((schema, table)) => Self::new(table, Some(schema)),
            None => Self::new(full_name, None),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Overwrite => write!(f, "overwrite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "Success"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// 單次作業執行的統計，由 pipeline 在各階段填入
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub rows_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_threshold_exceeded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub job_id: String,
    pub job_name: String,
    pub job_type: String,
    pub load_date: Option<String>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub report: RunReport,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn rows_processed(&self) -> usize {
        self.report.rows_processed
    }
}
