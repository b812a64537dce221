use crate::core::connector::RedshiftConnector;
use crate::core::etl::{Pipeline, RunContext};
use crate::domain::model::{Dataset, TableRef, WriteMode};
use crate::domain::ports::Warehouse;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const JOB_TYPE: &str = "control_m_poc_etl";
pub const SOURCE_SCHEMA: &str = "dna_actln_dwh";
pub const SOURCE_TABLE: &str = "vw_patients_opsumit_cap";
pub const DEST_SCHEMA: &str = "dna_actln_dwh";
pub const DEST_TABLE: &str = "ControlM_New_test";
pub const OUTPUT_COLUMNS: [&str; 4] = ["load_date", "product", "ac_number", "referral_date"];

/// Control M POC：讀 limit 列、加上 load_date、挑欄位、append 到目的表
pub struct ControlMPipeline<W: Warehouse = Arc<dyn Warehouse>> {
    connector: RedshiftConnector<W>,
}

impl<W: Warehouse> ControlMPipeline<W> {
    pub fn new(connector: RedshiftConnector<W>) -> Self {
        tracing::info!("ETL Service initialized");
        Self { connector }
    }
}

#[async_trait]
impl<W: Warehouse> Pipeline for ControlMPipeline<W> {
    fn name(&self) -> &str {
        "Control M POC ETL job"
    }

    async fn prepare(&self, ctx: &mut RunContext) -> Result<()> {
        tracing::info!("Using load date: {}", ctx.load_date);
        ctx.report.source_table = Some(TableRef::new(SOURCE_TABLE, Some(SOURCE_SCHEMA)).to_string());
        ctx.report.destination_table = Some(TableRef::new(DEST_TABLE, Some(DEST_SCHEMA)).to_string());
        Ok(())
    }

    async fn extract(&self, ctx: &mut RunContext) -> Result<Dataset> {
        tracing::info!(
            "Reading {} rows from {}.{}",
            ctx.limit,
            SOURCE_SCHEMA,
            SOURCE_TABLE
        );
        self.connector
            .read_table(SOURCE_TABLE, Some(SOURCE_SCHEMA), Some(ctx.limit))
            .await
    }

    async fn transform(&self, ctx: &mut RunContext, data: Dataset) -> Result<Dataset> {
        tracing::info!("Adding load_date column with value: {}", ctx.load_date);
        let data = data.with_column("load_date", Value::String(ctx.load_date.clone()));

        tracing::info!("Selecting columns: {:?}", OUTPUT_COLUMNS);
        let data = data.select(&OUTPUT_COLUMNS)?;

        tracing::info!("Sample transformed data:\n{}", data.show(5));
        tracing::info!("Prepared {} rows for loading", data.count());
        Ok(data)
    }

    async fn load(&self, ctx: &mut RunContext, data: Dataset) -> Result<()> {
        tracing::info!("Writing to {}.{} in append mode", DEST_SCHEMA, DEST_TABLE);
        self.connector
            .write_table(&data, DEST_TABLE, Some(DEST_SCHEMA), WriteMode::Append)
            .await?;
        ctx.report.rows_processed = data.count();
        Ok(())
    }
}
