use clap::Parser;
use spark_etl_agent::deploy::check::{check_manifest, has_errors};
use spark_etl_agent::deploy::image::{default_argv, DEFAULT_IMAGE};
use spark_etl_agent::deploy::manifest::{DeploymentProfile, EnvVar, SparkApplication};
use spark_etl_agent::utils::logger::LogLevel;
use spark_etl_agent::{AgentArgs, JobConfig};

// 這個檔案自成一個測試程式，設定的環境變數不會影響其他測試
#[test]
fn test_descriptor_env_overrides_image_defaults() {
    let mut app = SparkApplication::from_profile(&DeploymentProfile::default());
    let overrides = [
        ("JOB_ID", "9"),
        ("LIMIT", "25"),
        ("LOAD_DATE", "2025-07-01"),
        ("LOG_LEVEL", "debug"),
    ];
    app.spec
        .driver
        .env
        .retain(|var| !overrides.iter().any(|(name, _)| *name == var.name));
    for (name, value) in overrides {
        app.spec.driver.env.push(EnvVar {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    // 覆寫的都是映像宣告過的變數，不需重建映像
    let findings = check_manifest(&app, Some(DEFAULT_IMAGE));
    assert!(!has_errors(&findings), "{:?}", findings);
    assert!(findings.is_empty(), "{:?}", findings);

    // 模擬 driver pod 的環境
    for var in &app.spec.driver.env {
        std::env::set_var(&var.name, &var.value);
    }

    // 沒給旗標時全由環境變數決定
    let args = AgentArgs::try_parse_from(["spark-etl-agent"]).unwrap();
    assert_eq!(args.job_id.as_deref(), Some("9"));
    assert_eq!(args.limit, 25);
    assert_eq!(args.load_date.as_deref(), Some("2025-07-01"));
    assert_eq!(args.log_level, LogLevel::Debug);

    let (config, _) = JobConfig::resolve(&args).unwrap();
    assert_eq!(config.id, "9");
    assert_eq!(config.limit, 25);

    // 明確的旗標優先於環境變數
    let args = AgentArgs::try_parse_from(default_argv()).unwrap();
    assert_eq!(args.job_id.as_deref(), Some("3"));
    assert_eq!(args.load_date.as_deref(), Some("2025-05-19"));
    assert_eq!(args.limit, 25);

    let args = AgentArgs::try_parse_from([
        "spark-etl-agent",
        "--limit",
        "3",
        "--log-level",
        "ERROR",
    ])
    .unwrap();
    assert_eq!(args.limit, 3);
    assert_eq!(args.log_level, LogLevel::Error);
}
