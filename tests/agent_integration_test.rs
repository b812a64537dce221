mod common;

use clap::Parser;
use common::{env, RecordingNotifier, SlowWarehouse};
use serde_json::json;
use spark_etl_agent::app::pipelines::jcap_pa::CDP_EXTRACT_QUERY;
use spark_etl_agent::core::agent::{shutdown_channel, RunMode, EXIT_FAILURE, EXIT_SUCCESS};
use spark_etl_agent::core::notification::EmailService;
use spark_etl_agent::config::JobSource;
use spark_etl_agent::domain::model::Row;
use spark_etl_agent::{
    Agent, AgentArgs, Dataset, JobConfig, JobService, LocalStorage, MemoryWarehouse, Settings,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn agent(
    dir: &TempDir,
    warehouse: Arc<MemoryWarehouse>,
) -> Agent<Arc<MemoryWarehouse>, LocalStorage> {
    let settings = Settings::from_sources(&env(&[("EMAIL_TO_DNA_TEAM", "team@example.com")]), &HashMap::new())
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let jobs = JobService::new(
        &settings,
        warehouse,
        LocalStorage::new(dir.path()),
        EmailService::new(&settings, Some(notifier)),
    );
    let (_tx, rx) = shutdown_channel();
    Agent::new(jobs, rx)
}

#[tokio::test]
async fn test_container_default_command_runs_control_m() {
    let args = AgentArgs::try_parse_from(spark_etl_agent::deploy::image::default_argv()).unwrap();
    let (config, source) = JobConfig::resolve(&args).unwrap();
    assert_eq!(source, JobSource::JobId);
    assert_eq!(config.job_type(), "control_m_poc_etl");

    let dir = TempDir::new().unwrap();
    let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
    let code = agent(&dir, warehouse.clone()).run(&config, RunMode::Single).await;

    assert_eq!(code, EXIT_SUCCESS);
    let dest = warehouse.table("dna_actln_dwh.ControlM_New_test").unwrap();
    assert_eq!(dest.count(), 5);
    assert_eq!(dest.rows[0]["load_date"], serde_json::json!("2025-05-19"));
}

#[tokio::test]
async fn test_toml_job_file_with_env_substitution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job.toml");
    std::env::set_var("AGENT_TEST_JOB_ID", "toml_42");
    std::fs::write(
        &path,
        "id = \"${AGENT_TEST_JOB_ID}\"\ntype = \"control_m_poc_etl\"\nload_date = \"2025-06-01\"\nlimit = 2\n",
    )
    .unwrap();

    let args = AgentArgs::try_parse_from([
        "spark-etl-agent",
        "--job-config-file",
        path.to_str().unwrap(),
        "--job-id",
        "ignored",
    ])
    .unwrap();
    let (config, source) = JobConfig::resolve(&args).unwrap();
    assert!(matches!(source, JobSource::File(_)));
    assert_eq!(config.id, "toml_42");

    let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
    let code = agent(&dir, warehouse.clone()).run(&config, RunMode::Single).await;
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(
        warehouse.table("dna_actln_dwh.ControlM_New_test").unwrap().count(),
        2
    );
}

#[tokio::test]
async fn test_warehouse_failure_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let warehouse = Arc::new(MemoryWarehouse::with_sample_data());
    warehouse.fail_on("INSERT");

    let config = JobConfig::from_json_str(r#"{"id": 5, "limit": 3}"#).unwrap();
    let code = agent(&dir, warehouse.clone()).run(&config, RunMode::Single).await;

    assert_eq!(code, EXIT_FAILURE);
    assert!(warehouse.table("dna_actln_dwh.ControlM_New_test").is_none());
}

fn rows(values: Vec<serde_json::Value>) -> Dataset {
    let rows: Vec<Row> = values
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
    Dataset::from_rows(rows)
}

#[tokio::test]
async fn test_shutdown_during_single_run_lets_the_load_finish() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(
        MemoryWarehouse::new()
            .with_table(
                "jcap.jcap_pa",
                rows((0..10)
                    .map(|i| json!({"pmc_patid": format!("P{}", i), "drugortherapy": "OPSUMIT"}))
                    .collect()),
            )
            .with_table("jcap.jcap_pa_bkp", Dataset::default()),
    );
    memory.register_query(
        CDP_EXTRACT_QUERY.trim(),
        rows((0..3)
            .map(|i| {
                json!({
                    "JCAP_table_loaddate": "2025-05-19",
                    "pmc_patid": format!("100{}", i),
                    "REFERRING_HCP_PATH_STATE": "NJ",
                    "DrugorTherapy": "OPSUMIT",
                    "PA_CompletedDate": "01-31-2025",
                    "PA_InitiatedDate": "01-10-2025",
                    "PADisposition": "Approved",
                    "load_date": "2025-05-18",
                })
            })
            .collect()),
    );
    // TRUNCATE 之後的 insert 要 300ms，信號在 100ms 送達
    let warehouse = Arc::new(SlowWarehouse::new(
        memory.clone(),
        "jcap.jcap_pa",
        Duration::from_millis(300),
    ));

    let settings = Settings::from_sources(
        &env(&[
            ("S3_BUCKET", "analytics-bucket"),
            ("JCAP_REDSHIFT_SCHEMA", "jcap"),
            ("EMAIL_TO_DNA_TEAM", "team@example.com"),
        ]),
        &HashMap::new(),
    )
    .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let jobs = JobService::new(
        &settings,
        warehouse,
        LocalStorage::new(dir.path()),
        EmailService::new(&settings, Some(notifier.clone())),
    );
    let (tx, rx) = shutdown_channel();
    let agent = Agent::new(jobs, rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
    });

    let config = JobConfig::from_job_id("jcap_001", Some("jcap_pa_etl"), Some("2025-05-19"), 10);
    let code = agent.run(&config, RunMode::Single).await;

    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(memory.table("jcap.jcap_pa").unwrap().count(), 3);
    assert_eq!(memory.table("jcap.jcap_pa_bkp").unwrap().count(), 10);
    assert!(notifier
        .subjects()
        .contains(&"✅ JCAP PA ETL - Success".to_string()));
}
