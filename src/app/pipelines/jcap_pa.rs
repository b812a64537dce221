use crate::core::connector::RedshiftConnector;
use crate::core::etl::{Pipeline, RunContext};
use crate::core::notification::{format_count, EmailService};
use crate::core::staging::StagingService;
use crate::domain::model::{Dataset, JobStatus, TableRef, WriteMode};
use crate::domain::ports::{Storage, Warehouse};
use crate::utils::error::{EtlError, Result};
use crate::utils::functions::to_timestamp;
use async_trait::async_trait;
use std::sync::Arc;

pub const JOB_TYPE: &str = "jcap_pa_etl";
pub const JOB_LABEL: &str = "JCAP PA ETL";
pub const MAIN_TABLE: &str = "jcap_pa";
pub const BACKUP_TABLE: &str = "jcap_pa_bkp";
pub const STAGING_PREFIX: &str = "jcap_pa_dashboard";
pub const SOURCE_DATE_PATTERN: &str = "MM-dd-yyyy";

pub const TIMESTAMP_COLUMNS: [&str; 4] = [
    "load_date",
    "PA_CompletedDate",
    "PA_InitiatedDate",
    "JCAP_table_loaddate",
];

pub const COLUMN_RENAMES: [(&str, &str); 9] = [
    ("DrugorTherapy", "drugortherapy"),
    ("PADisposition", "padisposition"),
    ("AppealDisposition", "appealdisposition"),
    ("FEREquired", "ferequired"),
    ("rx_PlanName", "rx_planname"),
    ("rx_PayerName", "rx_payername"),
    ("rx_PayerType", "rx_payertype"),
    ("LHM_Name", "lhm_name"),
    ("REFERRING_HCP_PATH_STATE", "referring_hcp_path_state"),
];

/// PAH 藥品的 PA 核准/拒絕紀錄，2025 年起
pub const CDP_EXTRACT_QUERY: &str = r#"
SELECT DISTINCT
    CURRENT_DATE::date AS JCAP_table_loaddate,
    p.pmc_patid::varchar AS pmc_patid,
    U.MANAGING_HCP_STATE AS REFERRING_HCP_PATH_STATE,
    P.prod_nm AS DrugorTherapy,
    pa_completed_date::Date AS PA_CompletedDate,
    pa_initiated_date::Date AS PA_InitiatedDate,
    p.pa_disposition AS PADisposition,
    P.Appeal_Disposition AS AppealDisposition,
    P.FE_REquired AS FEREquired,
    P.rx_PlanName AS rx_PlanName,
    P.rx_PayerName AS rx_PayerName,
    P.rx_PayerType AS rx_PayerType,
    p.sr_type AS srtype,
    p.load_date::Date AS load_date,
    p.ins_planname AS insurancebenefitplanname,
    p.pbm_name AS pbmpayername,
    C.LHM_Name,
    c.bd_terrname AS region,
    S.dynamic_segment AS segment
FROM (
    SELECT * FROM cdp.fct_pah_pa_payer_details
    WHERE UPPER(prod_nm) IN ('OPSUMIT', 'UPTRAVI', 'OPSYNVI')
    AND pa_disposition IN ('Approved', 'Denied')
) P
LEFT JOIN (
    SELECT DISTINCT
        pmc_patid, prod_nm, MANAGING_HCP_STATE,
        managing_hcp_zip, managing_hcp_jnj_id
    FROM cdp.fct_pah_ref_cap_dly
) U ON P.pmc_patid = U.pmc_PATID
    AND UPPER(P.prod_nm) = UPPER(U.prod_nm)
LEFT JOIN (
    SELECT * FROM cdp.dmn_pah_curr_alignment_all
) C ON U.managing_hcp_zip = C.zip
LEFT JOIN (
    SELECT JNJ_ID, Dynamic_Segment
    FROM cdp.DMN_PAH_SEGMENT
    WHERE actv_Flag = '1'
) S ON U.managing_hcp_jnj_id = S.jnj_id
WHERE pa_completed_date > '2024-12-31'
AND pa_completed_date <= CURRENT_DATE
"#;

/// |cur - prev| / prev × 100；prev 為 0 時回傳 0
pub fn variance_percentage(previous: u64, current: u64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    previous.abs_diff(current) as f64 / previous as f64 * 100.0
}

pub fn staging_path(bucket: &str) -> String {
    format!("s3://{}/{}/", bucket, STAGING_PREFIX)
}

/// 日期欄位轉成 timestamp，欄位名稱改成目的表的小寫名稱
pub fn transform_pa_records(data: Dataset) -> Dataset {
    let mut data = data;
    for column in TIMESTAMP_COLUMNS {
        if data.has_column(column) {
            data = data.map_column(column, |v| to_timestamp(v, SOURCE_DATE_PATTERN));
        }
    }
    for (old, new) in COLUMN_RENAMES {
        data = data.with_column_renamed(old, new);
    }
    data
}

/// CDP → S3 暫存 → JCAP，含備份、筆數驗證與差異通知
pub struct JcapPaPipeline<S: Storage, W: Warehouse = Arc<dyn Warehouse>> {
    cdp: RedshiftConnector<W>,
    jcap: RedshiftConnector<W>,
    staging: Arc<StagingService<S>>,
    email: Arc<EmailService>,
    schema: String,
    s3_path: String,
    variance_threshold: f64,
}

impl<S: Storage, W: Warehouse> JcapPaPipeline<S, W> {
    pub fn new(
        cdp: RedshiftConnector<W>,
        jcap: RedshiftConnector<W>,
        staging: Arc<StagingService<S>>,
        email: Arc<EmailService>,
        schema: &str,
        bucket: &str,
        variance_threshold: f64,
    ) -> Self {
        let s3_path = staging_path(bucket);
        tracing::info!("🏭 JCAP PA ETL Service initialized");
        tracing::info!("📋 CDP Source: {}", cdp.connection_type());
        tracing::info!("📋 JCAP Destination: {}", jcap.connection_type());
        tracing::info!("💾 S3 Staging: {}", s3_path);
        Self {
            cdp,
            jcap,
            staging,
            email,
            schema: schema.to_string(),
            s3_path,
            variance_threshold,
        }
    }

    pub fn s3_path(&self) -> &str {
        &self.s3_path
    }

    fn schema(&self) -> Option<&str> {
        Some(self.schema.as_str())
    }

    /// 回傳備份前主表筆數
    async fn create_and_validate_backup(&self) -> Result<u64> {
        tracing::info!("🗑️ Truncating backup table");
        self.jcap.truncate_table(BACKUP_TABLE, self.schema()).await?;

        let original_count = self.jcap.get_table_count(MAIN_TABLE, self.schema()).await?;
        tracing::info!("📊 Original count: {}", format_count(original_count));

        if original_count == 0 {
            tracing::warn!("⚠️ Main table is empty - skipping backup");
            return Ok(0);
        }

        tracing::info!("🔄 Copying data to backup");
        let copied = self
            .jcap
            .copy_table_data(MAIN_TABLE, BACKUP_TABLE, self.schema(), self.schema())
            .await?;

        let backup_count = self.jcap.get_table_count(BACKUP_TABLE, self.schema()).await?;
        if backup_count != original_count {
            return Err(EtlError::ValidationError {
                message: format!(
                    "Backup validation failed: Original={}, Backup={}, Copied={}",
                    format_count(original_count),
                    format_count(backup_count),
                    format_count(copied)
                ),
            });
        }

        tracing::info!(
            "✅ Backup created and validated: {} rows",
            format_count(backup_count)
        );
        Ok(original_count)
    }

    async fn stage(&self, data: &Dataset) -> Result<()> {
        tracing::info!("💾 Staging data to S3: {}", self.s3_path);
        if self.staging.path_exists(&self.s3_path).await {
            tracing::info!("🗑️ Removing existing S3 data");
            self.staging.delete_path(&self.s3_path).await;
        }
        self.staging
            .write_parquet(data, &self.s3_path, WriteMode::Overwrite, None)
            .await?;
        tracing::info!("✅ Data staged to S3 successfully");
        Ok(())
    }

    async fn load_destination(&self, data: &Dataset) -> Result<u64> {
        tracing::info!("🗑️ Truncating destination table");
        self.jcap.truncate_table(MAIN_TABLE, self.schema()).await?;

        let row_count = data.count() as u64;
        tracing::info!("📥 Loading {} rows", format_count(row_count));
        self.jcap
            .write_table(data, MAIN_TABLE, self.schema(), WriteMode::Append)
            .await?;

        let final_count = self.jcap.get_table_count(MAIN_TABLE, self.schema()).await?;
        tracing::info!("📊 Final table count: {}", format_count(final_count));

        if final_count == 0 {
            return Err(EtlError::ValidationError {
                message: "No rows loaded despite successful write operation!".to_string(),
            });
        }
        if final_count != row_count {
            tracing::warn!(
                "⚠️ Row count mismatch: Expected {}, Got {}",
                format_count(row_count),
                format_count(final_count)
            );
        }

        tracing::info!("✅ Data loaded to destination successfully");
        Ok(final_count)
    }
}

#[async_trait]
impl<S: Storage + 'static, W: Warehouse> Pipeline for JcapPaPipeline<S, W> {
    fn name(&self) -> &str {
        JOB_LABEL
    }

    async fn prepare(&self, ctx: &mut RunContext) -> Result<()> {
        tracing::info!("📅 Load date: {}", ctx.load_date);
        ctx.report.source_table = Some("cdp (PA payer details query)".to_string());
        ctx.report.destination_table =
            Some(TableRef::new(MAIN_TABLE, self.schema()).to_string());
        ctx.report.s3_path = Some(self.s3_path.clone());

        tracing::info!("1️⃣ Creating backup and validation");
        let previous = self
            .create_and_validate_backup()
            .await
            .map_err(|e| EtlError::processing(format!("Backup creation failed: {}", e)))?;
        ctx.report.previous_count = Some(previous);
        Ok(())
    }

    async fn extract(&self, _ctx: &mut RunContext) -> Result<Dataset> {
        tracing::info!("2️⃣ Extracting data from CDP");
        let data = self
            .cdp
            .execute_sql(CDP_EXTRACT_QUERY.trim())
            .await
            .map_err(|e| EtlError::processing(format!("CDP extraction failed: {}", e)))?;

        tracing::info!("📊 Extracted {} rows from CDP", format_count(data.count() as u64));
        tracing::info!("📋 Sample extracted data:\n{}", data.show(5));
        Ok(data)
    }

    async fn transform(&self, _ctx: &mut RunContext, data: Dataset) -> Result<Dataset> {
        tracing::info!("3️⃣ Transforming data");
        let transformed = transform_pa_records(data);

        tracing::info!("📋 Transformed schema:");
        for (name, kind) in transformed.schema() {
            tracing::info!("  {}: {}", name, kind);
        }
        Ok(transformed)
    }

    async fn load(&self, _ctx: &mut RunContext, data: Dataset) -> Result<()> {
        tracing::info!("4️⃣ Staging data to S3");
        self.stage(&data)
            .await
            .map_err(|e| EtlError::processing(format!("S3 staging failed: {}", e)))?;

        tracing::info!("5️⃣ Loading to destination");
        self.load_destination(&data)
            .await
            .map_err(|e| EtlError::processing(format!("Destination load failed: {}", e)))?;
        Ok(())
    }

    async fn finish(&self, ctx: &mut RunContext) -> Result<()> {
        tracing::info!("6️⃣ Validating results");
        let current = self.jcap.get_table_count(MAIN_TABLE, self.schema()).await?;
        let previous = ctx.report.previous_count.unwrap_or(0);

        let variance = variance_percentage(previous, current);
        tracing::info!(
            "📈 Previous: {}, Current: {}",
            format_count(previous),
            format_count(current)
        );
        tracing::info!(
            "📈 Variance: {} ({:.2}%)",
            format_count(previous.abs_diff(current)),
            variance
        );

        let exceeded = variance >= self.variance_threshold;
        let mut email_sent = false;
        if exceeded {
            tracing::warn!(
                "⚠️ Variance {:.2}% exceeds threshold {}%",
                variance,
                self.variance_threshold
            );
            email_sent = self
                .email
                .send_data_variance_alert(variance, JOB_LABEL, previous, current)
                .await;
            if email_sent {
                tracing::info!("📧 Variance alert sent successfully");
            } else {
                tracing::error!("❌ Failed to send variance alert");
            }
        } else {
            tracing::info!("✅ Variance within acceptable threshold");
        }

        ctx.report.rows_processed = current as usize;
        ctx.report.current_count = Some(current);
        ctx.report.variance_percentage = Some(variance);
        ctx.report.variance_threshold_exceeded = Some(exceeded);
        ctx.report.email_sent = Some(email_sent);

        tracing::info!("📈 Variance: {:.2}%", variance);
        self.email
            .send_job_completion_notification(
                JOB_LABEL,
                JobStatus::Success,
                ctx.elapsed_seconds(),
                current,
                None,
            )
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &RunContext, error: &EtlError) {
        self.email
            .send_job_completion_notification(
                JOB_LABEL,
                JobStatus::Failed,
                ctx.elapsed_seconds(),
                0,
                Some(&error.to_string()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variance_percentage() {
        assert_eq!(variance_percentage(0, 500), 0.0);
        assert_eq!(variance_percentage(1000, 1100), 10.0);
        assert_eq!(variance_percentage(1000, 900), 10.0);
        assert_eq!(variance_percentage(200, 200), 0.0);
    }

    #[test]
    fn test_transform_converts_dates_and_renames() {
        let rows = vec![json!({
            "JCAP_table_loaddate": "2025-05-19",
            "DrugorTherapy": "OPSUMIT",
            "PA_CompletedDate": "01-31-2025",
            "PA_InitiatedDate": "garbage",
            "load_date": "2025-01-02",
            "LHM_Name": "Team A",
            "region": "East",
        })
        .as_object()
        .cloned()
        .unwrap()];
        let out = transform_pa_records(Dataset::from_rows(rows));

        assert_eq!(
            out.columns,
            vec![
                "JCAP_table_loaddate",
                "drugortherapy",
                "PA_CompletedDate",
                "PA_InitiatedDate",
                "load_date",
                "lhm_name",
                "region"
            ]
        );
        let row = &out.rows[0];
        assert_eq!(row["PA_CompletedDate"], json!("2025-01-31 00:00:00"));
        assert_eq!(row["JCAP_table_loaddate"], json!("2025-05-19 00:00:00"));
        assert_eq!(row["PA_InitiatedDate"], serde_json::Value::Null);
        assert_eq!(row["drugortherapy"], json!("OPSUMIT"));
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(staging_path("bucket"), "s3://bucket/jcap_pa_dashboard/");
    }
}
