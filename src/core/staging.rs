use crate::domain::model::{display_value, Dataset, WriteMode};
use crate::domain::ports::Storage;
use crate::utils::columnar;
use crate::utils::error::{EtlError, Result};
use std::collections::BTreeMap;

const PARQUET_ROWS_PER_FILE: usize = 50_000;
const PARQUET_SPLIT_THRESHOLD: usize = 100_000;
const MAX_PARQUET_FILES: usize = 20;
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// 輸出檔數：超過十萬列才切，最多 20 個檔
pub fn parquet_files(rows: usize) -> usize {
    if rows > PARQUET_SPLIT_THRESHOLD {
        (rows / PARQUET_ROWS_PER_FILE).clamp(1, MAX_PARQUET_FILES)
    } else {
        1
    }
}

/// `s3://bucket/prefix` 或一般前綴，轉成儲存層 key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPath {
    pub bucket: Option<String>,
    pub prefix: String,
}

impl StagingPath {
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        let stripped = ["s3://", "s3a://", "s3n://"]
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme));

        match stripped {
            Some(rest) => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(EtlError::storage(format!("Missing bucket in path: {}", path)));
                }
                Ok(Self {
                    bucket: Some(bucket.to_string()),
                    prefix: prefix.trim_matches('/').to_string(),
                })
            }
            None => Ok(Self {
                bucket: None,
                prefix: trimmed.trim_matches('/').to_string(),
            }),
        }
    }

    pub fn key(&self) -> String {
        match &self.bucket {
            Some(bucket) if self.prefix.is_empty() => bucket.clone(),
            Some(bucket) => format!("{}/{}", bucket, self.prefix),
            None => self.prefix.clone(),
        }
    }

    /// 列出或刪除整個目錄時用的前綴，結尾帶 `/`，
    /// 物件儲存才不會連 `prefix_archive/` 這類同名開頭的目錄一起比對到
    pub fn dir_prefix(&self) -> String {
        let key = self.key();
        if key.is_empty() {
            key
        } else {
            format!("{}/", key)
        }
    }

    pub fn child(&self, name: &str) -> String {
        let key = self.key();
        if key.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", key, name)
        }
    }
}

/// Parquet 暫存區：寫入、讀回、檢查與刪除
pub struct StagingService<S: Storage> {
    storage: S,
}

impl<S: Storage> StagingService<S> {
    pub fn new(storage: S) -> Self {
        tracing::info!("💾 Staging service initialized");
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn write_parquet(
        &self,
        data: &Dataset,
        path: &str,
        mode: WriteMode,
        partition_by: Option<&[&str]>,
    ) -> Result<String> {
        self.try_write_parquet(data, path, mode, partition_by)
            .await
            .map_err(|e| {
                tracing::error!("❌ Failed to write to staging: {}", e);
                EtlError::storage(format!("Staging write failed: {}", e))
            })
    }

    async fn try_write_parquet(
        &self,
        data: &Dataset,
        path: &str,
        mode: WriteMode,
        partition_by: Option<&[&str]>,
    ) -> Result<String> {
        let target = StagingPath::parse(path)?;
        tracing::info!("💾 Writing {} rows to staging: {}", data.count(), path);

        if mode == WriteMode::Overwrite && self.storage.exists(&target.dir_prefix()).await? {
            let removed = self.storage.delete_prefix(&target.dir_prefix()).await?;
            tracing::debug!("Removed {} existing objects under {}", removed, path);
        }

        let groups = match partition_by.filter(|cols| !cols.is_empty()) {
            Some(columns) => {
                tracing::info!("📁 Partitioning by: {:?}", columns);
                partition_groups(data, columns)?
            }
            None => vec![(String::new(), data.clone())],
        };

        // 檔名接續既有檔案編號，append 不會覆蓋舊檔
        let mut file_index = match mode {
            WriteMode::Append => self
                .storage
                .list(&target.dir_prefix())
                .await?
                .iter()
                .filter(|key| key.ends_with(".parquet"))
                .count(),
            WriteMode::Overwrite => 0,
        };
        for (directory, group) in groups {
            let files = parquet_files(group.count());
            for part in group.partition(files) {
                let name = format!("part-{:05}.snappy.parquet", file_index);
                let relative = if directory.is_empty() {
                    name
                } else {
                    format!("{}/{}", directory, name)
                };
                let bytes = columnar::to_parquet(&part)?;
                self.storage
                    .write_file(&target.child(&relative), &bytes)
                    .await?;
                file_index += 1;
            }
        }

        self.storage
            .write_file(&target.child(SUCCESS_MARKER), b"")
            .await?;
        tracing::info!("✅ Successfully wrote to staging: {}", path);
        Ok(path.to_string())
    }

    pub async fn read_parquet(&self, path: &str) -> Result<Dataset> {
        tracing::info!("📖 Reading from staging: {}", path);
        let target = StagingPath::parse(path)?;

        let mut files = self.storage.list(&target.dir_prefix()).await?;
        files.retain(|key| key.ends_with(".parquet"));
        files.sort();
        if files.is_empty() {
            return Err(EtlError::storage(format!(
                "Staging read failed: no Parquet files under {}",
                path
            )));
        }

        let mut result: Option<Dataset> = None;
        for file in files {
            let bytes = self.storage.read_file(&file).await?;
            let mut part = columnar::from_parquet(bytes)?;
            // hive 風格目錄 col=value 還原成欄位
            for (column, value) in partition_values(&target.key(), &file) {
                part = part.with_column(&column, serde_json::Value::String(value));
            }
            match result.as_mut() {
                Some(acc) => acc.rows.extend(part.rows),
                None => result = Some(part),
            }
        }

        let data = result.unwrap_or_default();
        tracing::info!("✅ Successfully read {} rows from staging", data.count());
        Ok(data)
    }

    pub async fn path_exists(&self, path: &str) -> bool {
        match StagingPath::parse(path) {
            Ok(target) => self.storage.exists(&target.dir_prefix()).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// 失敗只記警告
    pub async fn delete_path(&self, path: &str) {
        if !self.path_exists(path).await {
            return;
        }
        let result = match StagingPath::parse(path) {
            Ok(target) => self.storage.delete_prefix(&target.dir_prefix()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => tracing::info!("🗑️ Deleted staging path: {}", path),
            Err(e) => tracing::warn!("⚠️ Failed to delete staging path {}: {}", path, e),
        }
    }
}

fn partition_groups(data: &Dataset, columns: &[&str]) -> Result<Vec<(String, Dataset)>> {
    let resolved: Vec<String> = columns
        .iter()
        .map(|c| {
            data.resolve_column(c).map(str::to_string).ok_or_else(|| {
                EtlError::processing(format!("Partition column '{}' not found", c))
            })
        })
        .collect::<Result<_>>()?;

    let kept: Vec<String> = data
        .columns
        .iter()
        .filter(|c| !resolved.contains(c))
        .cloned()
        .collect();

    let mut groups: BTreeMap<String, Dataset> = BTreeMap::new();
    for row in &data.rows {
        let directory = resolved
            .iter()
            .map(|c| {
                let value = row.get(c).map(display_value).unwrap_or_default();
                let value = if value == "NULL" {
                    "__HIVE_DEFAULT_PARTITION__".to_string()
                } else {
                    value
                };
                format!("{}={}", c, value)
            })
            .collect::<Vec<_>>()
            .join("/");

        let projected = kept
            .iter()
            .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(serde_json::Value::Null)))
            .collect();

        groups
            .entry(directory)
            .or_insert_with(|| Dataset::new(kept.clone(), Vec::new()))
            .rows
            .push(projected);
    }
    Ok(groups.into_iter().collect())
}

fn partition_values(root: &str, file: &str) -> Vec<(String, String)> {
    let relative = file
        .strip_prefix(root)
        .unwrap_or(file)
        .trim_start_matches('/');
    let mut segments: Vec<&str> = relative.split('/').collect();
    segments.pop();
    segments
        .into_iter()
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
