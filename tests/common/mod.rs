#![allow(dead_code)]

use async_trait::async_trait;
use spark_etl_agent::domain::model::TableRef;
use spark_etl_agent::domain::ports::{Email, Notifier, Warehouse};
use spark_etl_agent::{Dataset, MemoryWarehouse, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 記錄所有寄出的郵件
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.subject).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn env(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 對指定資料表的 insert 先等一段時間，模擬長時間寫入
pub struct SlowWarehouse {
    inner: Arc<MemoryWarehouse>,
    table: String,
    delay: Duration,
}

impl SlowWarehouse {
    pub fn new(inner: Arc<MemoryWarehouse>, table: &str, delay: Duration) -> Self {
        Self {
            inner,
            table: table.to_lowercase(),
            delay,
        }
    }
}

#[async_trait]
impl Warehouse for SlowWarehouse {
    async fn query(&self, sql: &str) -> Result<Dataset> {
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.inner.execute(sql).await
    }

    async fn insert(&self, table: &TableRef, data: &Dataset) -> Result<u64> {
        if table.to_string().to_lowercase() == self.table {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.insert(table, data).await
    }
}
