use crate::app::pipelines::control_m::{self, ControlMPipeline};
use crate::app::pipelines::jcap_pa::{self, JcapPaPipeline};
use crate::config::job::JobConfig;
use crate::config::settings::{ConnectionType, Settings};
use crate::core::connector::RedshiftConnector;
use crate::core::etl::{EtlEngine, RunContext};
use crate::core::notification::EmailService;
use crate::core::staging::StagingService;
use crate::domain::model::{JobResult, JobStatus};
use crate::domain::ports::{Storage, WarehouseProvider};
use crate::utils::error::{EtlError, Result};
use chrono::Local;
use std::sync::Arc;

pub const SUPPORTED_JOB_TYPES: [&str; 2] = [control_m::JOB_TYPE, jcap_pa::JOB_TYPE];

/// 空白的 load_date 以今天代替
pub fn effective_load_date(load_date: Option<&str>) -> String {
    load_date
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string())
}

/// 依作業類型分派到對應的 pipeline，結果一律包成 JobResult
pub struct JobService<P: WarehouseProvider, S: Storage> {
    warehouses: P,
    staging: Arc<StagingService<S>>,
    email: Arc<EmailService>,
    jcap_schema: String,
    s3_bucket: Option<String>,
    variance_threshold: f64,
    parallelism: usize,
    monitor_enabled: bool,
}

impl<P: WarehouseProvider, S: Storage + 'static> JobService<P, S> {
    pub fn new(settings: &Settings, warehouses: P, storage: S, email: EmailService) -> Self {
        tracing::info!("🏭 Job Service initialized");
        Self {
            warehouses,
            staging: Arc::new(StagingService::new(storage)),
            email: Arc::new(email),
            jcap_schema: settings.jcap_redshift_schema.clone(),
            s3_bucket: settings.s3_bucket.clone(),
            variance_threshold: settings.data_variance_threshold,
            parallelism: 1,
            monitor_enabled: false,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    pub async fn execute_job(&self, config: &JobConfig) -> JobResult {
        let start_time = Local::now();
        let job_type = config.job_type().to_string();
        let job_name = config.job_name();
        let load_date = effective_load_date(config.load_date.as_deref());

        tracing::info!("🎯 Executing job {} ({})", config.id, job_type);
        let mut ctx = RunContext::new(&config.id, &job_name, &load_date, config.limit);

        let outcome = match job_type.as_str() {
            control_m::JOB_TYPE => self.run_control_m(&mut ctx).await.map_err(|e| e.to_string()),
            jcap_pa::JOB_TYPE => self.run_jcap_pa(&mut ctx).await.map_err(|e| e.to_string()),
            other => Err(format!(
                "Unknown job type: {}. Supported types: {}",
                other,
                SUPPORTED_JOB_TYPES.join(", ")
            )),
        };

        let end_time = Local::now();
        let duration_seconds = ctx.elapsed_seconds();
        let (status, error) = match outcome {
            Ok(()) => {
                tracing::info!(
                    "✅ Job {} completed: {} rows in {:.2}s",
                    config.id,
                    ctx.report.rows_processed,
                    duration_seconds
                );
                (JobStatus::Success, None)
            }
            Err(message) => {
                tracing::error!("❌ Job {} failed: {}", config.id, message);
                (JobStatus::Failed, Some(message))
            }
        };

        JobResult {
            status,
            job_id: config.id.clone(),
            job_name,
            job_type,
            load_date: Some(load_date),
            start_time,
            end_time,
            duration_seconds,
            error,
            report: ctx.report,
        }
    }

    async fn run_control_m(&self, ctx: &mut RunContext) -> Result<()> {
        let warehouse = self.warehouses.warehouse(ConnectionType::Poc).await?;
        let connector =
            RedshiftConnector::new(warehouse, ConnectionType::Poc).with_parallelism(self.parallelism);
        let engine =
            EtlEngine::new_with_monitoring(ControlMPipeline::new(connector), self.monitor_enabled);
        engine.run(ctx).await
    }

    async fn run_jcap_pa(&self, ctx: &mut RunContext) -> Result<()> {
        let pipeline = match self.jcap_pipeline().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.email
                    .send_job_completion_notification(
                        jcap_pa::JOB_LABEL,
                        JobStatus::Failed,
                        ctx.elapsed_seconds(),
                        0,
                        Some(&e.to_string()),
                    )
                    .await;
                return Err(e);
            }
        };
        let engine = EtlEngine::new_with_monitoring(pipeline, self.monitor_enabled);
        engine.run(ctx).await
    }

    async fn jcap_pipeline(&self) -> Result<JcapPaPipeline<S>> {
        let bucket = self
            .s3_bucket
            .as_deref()
            .ok_or_else(|| EtlError::MissingConfigError {
                field: "S3_BUCKET".to_string(),
            })?;

        let cdp = self.warehouses.warehouse(ConnectionType::Cdp).await?;
        let jcap = self.warehouses.warehouse(ConnectionType::Jcap).await?;

        Ok(JcapPaPipeline::new(
            RedshiftConnector::new(cdp, ConnectionType::Cdp).with_parallelism(self.parallelism),
            RedshiftConnector::new(jcap, ConnectionType::Jcap).with_parallelism(self.parallelism),
            self.staging.clone(),
            self.email.clone(),
            &self.jcap_schema,
            bucket,
            self.variance_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::adapters::warehouse::MemoryWarehouse;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn service(
        warehouse: Arc<MemoryWarehouse>,
        dir: &TempDir,
    ) -> JobService<Arc<MemoryWarehouse>, LocalStorage> {
        let settings = Settings::from_sources(&HashMap::new(), &HashMap::new()).unwrap();
        let email = EmailService::new(&settings, None);
        JobService::new(&settings, warehouse, LocalStorage::new(dir.path()), email)
    }

    #[test]
    fn test_effective_load_date() {
        assert_eq!(effective_load_date(Some("2025-05-19")), "2025-05-19");
        let today = Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(effective_load_date(Some("  ")), today);
        assert_eq!(effective_load_date(None), today);
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_without_running() {
        let dir = TempDir::new().unwrap();
        let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
        let service = service(warehouse.clone(), &dir);

        let config = JobConfig::from_job_id("7", Some("nightly_export"), None, 10);
        let result = service.execute_job(&config).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Unknown job type: nightly_export. Supported types: control_m_poc_etl, jcap_pa_etl")
        );
        assert_eq!(result.job_type, "nightly_export");
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn test_control_m_job_result() {
        let dir = TempDir::new().unwrap();
        let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
        let service = service(warehouse.clone(), &dir).with_parallelism(4);

        let config = JobConfig::from_job_id("3", None, Some(""), 2);
        let result = service.execute_job(&config).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.rows_processed(), 2);
        assert_eq!(result.job_name, "Control M POC ETL Job 3");
        assert_eq!(
            result.load_date,
            Some(Local::now().format("%Y-%m-%d").to_string())
        );
        assert!(result.end_time >= result.start_time);
        assert_eq!(
            warehouse.table("dna_actln_dwh.ControlM_New_test").unwrap().count(),
            2
        );
    }

    #[tokio::test]
    async fn test_jcap_requires_bucket() {
        let dir = TempDir::new().unwrap();
        let service = service(Arc::new(MemoryWarehouse::new()), &dir);

        let config = JobConfig::from_job_id("9", Some(jcap_pa::JOB_TYPE), Some("2025-05-19"), 10);
        let result = service.execute_job(&config).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.unwrap().contains("S3_BUCKET"));
    }
}
