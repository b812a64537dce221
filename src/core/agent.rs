use crate::config::job::JobConfig;
use crate::core::job::JobService;
use crate::domain::ports::{Storage, WarehouseProvider};
use std::time::Duration;
use tokio::sync::watch;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Single,
    Continuous { interval: Duration },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rows: usize,
}

/// 建立關閉旗標；送出 true 代表要求停止
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// SIGINT / SIGTERM 轉成關閉旗標
pub fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("⚠️ Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("🛑 Received SIGINT, shutting down gracefully..."),
            _ = terminate => tracing::info!("🛑 Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown.send(true);
    })
}

/// 等到關閉旗標成立；發送端消失時永遠等待
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct Agent<P: WarehouseProvider, S: Storage> {
    jobs: JobService<P, S>,
    shutdown: watch::Receiver<bool>,
}

impl<P: WarehouseProvider, S: Storage + 'static> Agent<P, S> {
    pub fn new(jobs: JobService<P, S>, shutdown: watch::Receiver<bool>) -> Self {
        Self { jobs, shutdown }
    }

    /// 回傳程序結束碼
    pub async fn run(&self, config: &JobConfig, mode: RunMode) -> i32 {
        match mode {
            RunMode::Single => self.run_single(config).await,
            RunMode::Continuous { interval } => {
                let summary = self.run_continuous(config, interval).await;
                tracing::info!(
                    "📊 Agent stopped after {} runs ({} succeeded, {} failed), {} rows processed",
                    summary.runs,
                    summary.succeeded,
                    summary.failed,
                    summary.total_rows
                );
                EXIT_SUCCESS
            }
        }
    }

    /// 信號只設旗標，已開始的執行一定跑完；開始前就要求停止才回 130
    pub async fn run_single(&self, config: &JobConfig) -> i32 {
        if *self.shutdown.borrow() {
            tracing::warn!("🛑 Shutdown requested before the job started");
            return EXIT_INTERRUPTED;
        }

        tracing::info!("🎯 Running single job execution");
        let result = self.jobs.execute_job(config).await;
        if *self.shutdown.borrow() {
            tracing::info!("🛑 Shutdown requested during the run, job was allowed to finish");
        }

        if result.is_success() {
            tracing::info!(
                "✅ Job completed successfully: {} rows processed",
                result.rows_processed()
            );
            EXIT_SUCCESS
        } else {
            tracing::error!(
                "❌ Job failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
            EXIT_FAILURE
        }
    }

    /// 目前這次執行跑完才檢查關閉旗標；等待間隔可被打斷
    pub async fn run_continuous(&self, config: &JobConfig, interval: Duration) -> RunSummary {
        tracing::info!(
            "🔄 Running in continuous mode (interval: {}s)",
            interval.as_secs()
        );
        let mut summary = RunSummary::default();

        while !*self.shutdown.borrow() {
            summary.runs += 1;
            tracing::info!("🔄 Run #{} starting", summary.runs);

            let run_config = config.clone();
            let result = self.jobs.execute_job(&run_config).await;
            if result.is_success() {
                summary.succeeded += 1;
                summary.total_rows += result.rows_processed();
                tracing::info!(
                    "✅ Run #{} completed: {} rows in {:.2}s",
                    summary.runs,
                    result.rows_processed(),
                    result.duration_seconds
                );
            } else {
                summary.failed += 1;
                tracing::error!(
                    "❌ Run #{} failed: {}",
                    summary.runs,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }

            if *self.shutdown.borrow() {
                break;
            }
            tracing::info!("⏳ Waiting {} seconds before next run...", interval.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_requested(self.shutdown.clone()) => break,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::adapters::warehouse::MemoryWarehouse;
    use crate::config::settings::Settings;
    use crate::core::notification::EmailService;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn agent(
        dir: &TempDir,
        shutdown: watch::Receiver<bool>,
    ) -> (Agent<Arc<MemoryWarehouse>, LocalStorage>, Arc<MemoryWarehouse>) {
        let settings = Settings::from_sources(&HashMap::new(), &HashMap::new()).unwrap();
        let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
        let jobs = JobService::new(
            &settings,
            warehouse.clone(),
            LocalStorage::new(dir.path()),
            EmailService::new(&settings, None),
        );
        (Agent::new(jobs, shutdown), warehouse)
    }

    #[tokio::test]
    async fn test_single_run_exit_codes() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = shutdown_channel();
        let (agent, _) = agent(&dir, rx);

        let ok = JobConfig::from_job_id("3", None, Some("2025-05-19"), 2);
        assert_eq!(agent.run(&ok, RunMode::Single).await, EXIT_SUCCESS);

        let unknown = JobConfig::from_job_id("3", Some("bogus"), None, 2);
        assert_eq!(agent.run(&unknown, RunMode::Single).await, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_single_run_not_started_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = shutdown_channel();
        let (agent, warehouse) = agent(&dir, rx);
        tx.send(true).unwrap();

        let config = JobConfig::from_job_id("3", None, Some("2025-05-19"), 2);
        assert_eq!(agent.run_single(&config).await, EXIT_INTERRUPTED);
        assert!(warehouse.table("dna_actln_dwh.ControlM_New_test").is_none());
    }

    #[tokio::test]
    async fn test_continuous_stops_during_interval() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = shutdown_channel();
        let (agent, warehouse) = agent(&dir, rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let config = JobConfig::from_job_id("3", None, Some("2025-05-19"), 2);
        let summary = agent
            .run_continuous(&config, Duration::from_secs(3600))
            .await;

        assert_eq!(summary.runs, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total_rows, 2);
        assert_eq!(
            warehouse.table("dna_actln_dwh.ControlM_New_test").unwrap().count(),
            2
        );
    }

    #[tokio::test]
    async fn test_continuous_keeps_going_after_failures() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = shutdown_channel();
        let (agent, _) = agent(&dir, rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });

        let config = JobConfig::from_job_id("3", Some("bogus"), None, 2);
        let summary = agent
            .run_continuous(&config, Duration::from_millis(20))
            .await;

        assert!(summary.runs >= 2);
        assert_eq!(summary.failed, summary.runs);
        assert_eq!(summary.total_rows, 0);
    }

    #[tokio::test]
    async fn test_continuous_with_shutdown_already_requested() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = shutdown_channel();
        let (agent, _) = agent(&dir, rx);
        tx.send(true).unwrap();

        let config = JobConfig::from_job_id("3", None, None, 2);
        assert_eq!(
            agent.run(&config, RunMode::Continuous { interval: Duration::from_secs(1) }).await,
            EXIT_SUCCESS
        );
    }
}
