use crate::config::settings::Settings;
use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use std::path::{Path, PathBuf};

/// 本機目錄當作物件儲存，key 以 `/` 分隔
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_start_matches('/'))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.base_path)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if let Some(key) = self.key_of(&path) {
                out.push(key);
            }
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.full_path(path)).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(full_path, data).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.full_path(prefix);
        let mut keys = Vec::new();
        if root.is_file() {
            keys.extend(self.key_of(&root));
        } else if root.is_dir() {
            self.collect_files(&root, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, prefix: &str) -> Result<bool> {
        Ok(self.full_path(prefix).exists())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let root = self.full_path(prefix);
        let removed = self.list(prefix).await?.len();
        if root.is_dir() {
            tokio::fs::remove_dir_all(&root).await?;
        } else if root.is_file() {
            tokio::fs::remove_file(&root).await?;
        }
        Ok(removed)
    }
}

/// S3 物件儲存。key 的第一段是 bucket：`bucket/path/to/object`
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// 有 S3_ACCESS_KEY/S3_SECRET_KEY 時用靜態憑證，否則走預設鏈 (含 web identity)
    pub async fn from_settings(settings: &Settings) -> Self {
        let region = Region::new(settings.s3_region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if let Some((access_key, secret_key)) = settings.static_s3_credentials() {
            tracing::info!("🔑 Using static S3 credentials");
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "spark-etl-agent-static",
            ));
        } else {
            tracing::info!("🔑 Using default AWS credential chain for S3");
        }

        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared).build();
        Self::new(S3Client::from_conf(config))
    }

    fn split(key: &str) -> Result<(&str, &str)> {
        let key = key.trim_start_matches('/');
        match key.split_once('/') {
            Some((bucket, rest)) if !bucket.is_empty() => Ok((bucket, rest)),
            None if !key.is_empty() => Ok((key, "")),
            _ => Err(EtlError::storage(format!(
                "Storage key '{}' does not name a bucket",
                key
            ))),
        }
    }
}

impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (bucket, key) = Self::split(path)?;
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                EtlError::storage(format!("Failed to read from S3: {}", DisplayErrorContext(e)))
            })?;

        let data = resp.body.collect().await.map_err(|e| {
            EtlError::storage(format!("Failed to collect S3 data: {}", e))
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let (bucket, key) = Self::split(path)?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| {
                EtlError::storage(format!("Failed to write to S3: {}", DisplayErrorContext(e)))
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (bucket, key_prefix) = Self::split(prefix)?;
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key_prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                EtlError::storage(format!("Failed to list S3 objects: {}", DisplayErrorContext(e)))
            })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| format!("{}/{}", bucket, key)),
            );
        }
        Ok(keys)
    }

    async fn exists(&self, prefix: &str) -> Result<bool> {
        let (bucket, key_prefix) = Self::split(prefix)?;
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key_prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| {
                EtlError::storage(format!("Failed to check S3 path: {}", DisplayErrorContext(e)))
            })?;
        Ok(resp.key_count().unwrap_or(0) > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list(prefix).await?;
        for full_key in &keys {
            let (bucket, key) = Self::split(full_key)?;
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    EtlError::storage(format!(
                        "Failed to delete s3://{}/{}: {}",
                        bucket,
                        key,
                        DisplayErrorContext(e)
                    ))
                })?;
        }
        Ok(keys.len())
    }
}

/// 執行時才決定的暫存後端：STAGING_DIR 有設定用本機目錄，否則 S3
#[derive(Debug, Clone)]
pub enum AnyStorage {
    Local(LocalStorage),
    S3(S3Storage),
}

impl AnyStorage {
    pub async fn from_settings(settings: &Settings) -> Self {
        match &settings.staging_dir {
            Some(dir) => {
                tracing::info!("📁 Staging to local directory: {}", dir);
                AnyStorage::Local(LocalStorage::new(dir))
            }
            None => AnyStorage::S3(S3Storage::from_settings(settings).await),
        }
    }
}

impl Storage for AnyStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            AnyStorage::Local(s) => s.read_file(path).await,
            AnyStorage::S3(s) => s.read_file(path).await,
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        match self {
            AnyStorage::Local(s) => s.write_file(path, data).await,
            AnyStorage::S3(s) => s.write_file(path, data).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            AnyStorage::Local(s) => s.list(prefix).await,
            AnyStorage::S3(s) => s.list(prefix).await,
        }
    }

    async fn exists(&self, prefix: &str) -> Result<bool> {
        match self {
            AnyStorage::Local(s) => s.exists(prefix).await,
            AnyStorage::S3(s) => s.exists(prefix).await,
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        match self {
            AnyStorage::Local(s) => s.delete_prefix(prefix).await,
            AnyStorage::S3(s) => s.delete_prefix(prefix).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_write_list_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.write_file("bucket/a/part-00000.snappy.parquet", b"x").await.unwrap();
        storage.write_file("bucket/a/_SUCCESS", b"").await.unwrap();
        storage.write_file("bucket/b/other", b"y").await.unwrap();

        assert_eq!(storage.read_file("bucket/b/other").await.unwrap(), b"y");
        assert_eq!(
            storage.list("bucket/a").await.unwrap(),
            vec!["bucket/a/_SUCCESS", "bucket/a/part-00000.snappy.parquet"]
        );
        assert!(storage.exists("bucket/a").await.unwrap());

        assert_eq!(storage.delete_prefix("bucket/a").await.unwrap(), 2);
        assert!(!storage.exists("bucket/a").await.unwrap());
        assert_eq!(storage.delete_prefix("bucket/missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_local_storage_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.read_file("nope").await,
            Err(EtlError::IoError(_))
        ));
    }

    #[test]
    fn test_s3_key_split() {
        assert_eq!(S3Storage::split("b/p/q").unwrap(), ("b", "p/q"));
        assert_eq!(S3Storage::split("b").unwrap(), ("b", ""));
        assert!(S3Storage::split("").is_err());
    }

    #[tokio::test]
    async fn test_any_storage_uses_staging_dir() {
        let dir = TempDir::new().unwrap();
        let env = std::collections::HashMap::from([(
            "STAGING_DIR".to_string(),
            dir.path().to_string_lossy().to_string(),
        )]);
        let settings = Settings::from_sources(&env, &Default::default()).unwrap();

        let storage = AnyStorage::from_settings(&settings).await;
        assert!(matches!(storage, AnyStorage::Local(_)));
        storage.write_file("bucket/x", b"1").await.unwrap();
        assert!(dir.path().join("bucket/x").exists());
    }
}
