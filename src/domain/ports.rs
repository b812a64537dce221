use crate::domain::model::{Dataset, TableRef};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// 列出前綴下所有檔案 (相對於儲存根目錄的完整 key)
    fn list(&self, prefix: &str) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
    fn exists(&self, prefix: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
    fn delete_prefix(&self, prefix: &str)
        -> impl std::future::Future<Output = Result<usize>> + Send;
}

/// 資料倉儲連線。SQL 由上層組好，這裡只負責送出。
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Dataset>;
    async fn execute(&self, sql: &str) -> Result<u64>;
    async fn insert(&self, table: &TableRef, data: &Dataset) -> Result<u64>;
}

#[async_trait]
impl<T: Warehouse + ?Sized> Warehouse for std::sync::Arc<T> {
    async fn query(&self, sql: &str) -> Result<Dataset> {
        (**self).query(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        (**self).execute(sql).await
    }

    async fn insert(&self, table: &TableRef, data: &Dataset) -> Result<u64> {
        (**self).insert(table, data).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self) -> Result<std::collections::HashMap<String, String>>;
}

/// 依連線類型取得倉儲，實作可延遲連線並快取
#[async_trait]
pub trait WarehouseProvider: Send + Sync {
    async fn warehouse(
        &self,
        kind: crate::config::settings::ConnectionType,
    ) -> Result<std::sync::Arc<dyn Warehouse>>;
}

/// 所有連線類型都用同一個倉儲
#[async_trait]
impl<W: Warehouse + 'static> WarehouseProvider for std::sync::Arc<W> {
    async fn warehouse(
        &self,
        _kind: crate::config::settings::ConnectionType,
    ) -> Result<std::sync::Arc<dyn Warehouse>> {
        let warehouse: std::sync::Arc<dyn Warehouse> = self.clone();
        Ok(warehouse)
    }
}
