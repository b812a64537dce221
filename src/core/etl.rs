use crate::domain::model::{Dataset, RunReport};
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::SystemMonitor;
use async_trait::async_trait;
use std::time::Instant;

/// 單次執行的參數與統計，各階段共用
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub job_name: String,
    pub load_date: String,
    pub limit: usize,
    pub report: RunReport,
    started: Instant,
}

impl RunContext {
    pub fn new(job_id: &str, job_name: &str, load_date: &str, limit: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            load_date: load_date.to_string(),
            limit,
            report: RunReport::default(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    /// extract 之前的準備工作 (備份等)
    async fn prepare(&self, _ctx: &mut RunContext) -> Result<()> {
        Ok(())
    }

    async fn extract(&self, ctx: &mut RunContext) -> Result<Dataset>;
    async fn transform(&self, ctx: &mut RunContext, data: Dataset) -> Result<Dataset>;
    async fn load(&self, ctx: &mut RunContext, data: Dataset) -> Result<()>;

    /// load 之後的驗證與通知
    async fn finish(&self, _ctx: &mut RunContext) -> Result<()> {
        Ok(())
    }

    async fn on_failure(&self, _ctx: &RunContext, _error: &EtlError) {}
}

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(false),
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        match self.run_phases(ctx).await {
            Ok(()) => {
                self.monitor.log_final_stats();
                Ok(())
            }
            Err(e) => {
                tracing::error!("❌ {} failed: {}", self.pipeline.name(), e);
                self.pipeline.on_failure(ctx, &e).await;
                Err(e)
            }
        }
    }

    async fn run_phases(&self, ctx: &mut RunContext) -> Result<()> {
        let name = self.pipeline.name().to_string();
        tracing::info!("🚀 Starting {}", name);
        self.monitor.log_stats("Start");

        self.pipeline.prepare(ctx).await?;
        self.monitor.log_stats("Prepare");

        tracing::info!("📥 Extracting data...");
        let raw = self.pipeline.extract(ctx).await?;
        tracing::info!("📥 Extracted {} rows", raw.count());
        self.monitor.log_stats("Extract");

        tracing::info!("🔄 Transforming data...");
        let transformed = self.pipeline.transform(ctx, raw).await?;
        tracing::info!("🔄 Transformed {} rows", transformed.count());
        self.monitor.log_stats("Transform");

        tracing::info!("📤 Loading data...");
        self.pipeline.load(ctx, transformed).await?;
        self.monitor.log_stats("Load");

        self.pipeline.finish(ctx).await?;
        tracing::info!(
            "✅ {} completed: {} rows in {:.2} seconds",
            name,
            ctx.report.rows_processed,
            ctx.elapsed_seconds()
        );
        Ok(())
    }
}
