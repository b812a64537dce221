use crate::core::runtime::ExecutionMode;
use crate::utils::logger::LogLevel;
use clap::Parser;

pub const DEFAULT_JOB_TYPE: &str = "control_m_poc_etl";

#[derive(Debug, Clone, Parser)]
#[command(name = "spark-etl-agent")]
#[command(about = "Spark ETL agent - runs warehouse ETL jobs locally or on Kubernetes")]
#[command(after_help = "\
Examples:
  # Run the Control M POC ETL job once
  spark-etl-agent --job-id opsumit_001 --load-date 2025-05-20 --limit 10

  # Run continuously every 30 seconds
  spark-etl-agent --job-id opsumit_001 --limit 5 --continuous --interval 30

  # Run with an inline JSON configuration
  spark-etl-agent --job-config '{\"id\": \"test_001\", \"limit\": 5}' --continuous

  # Force local mode for development
  spark-etl-agent --local --job-id dev_001 --load-date 2025-05-20")]
pub struct AgentArgs {
    /// Job ID to execute
    #[arg(long, env = "JOB_ID")]
    pub job_id: Option<String>,

    /// Job configuration JSON string
    #[arg(long)]
    pub job_config: Option<String>,

    /// Path to a job configuration file (.json or .toml)
    #[arg(long)]
    pub job_config_file: Option<String>,

    /// Job type for a configuration built from --job-id
    #[arg(long, env = "JOB_TYPE")]
    pub job_type: Option<String>,

    /// Load date (YYYY-MM-DD)
    #[arg(long, env = "LOAD_DATE")]
    pub load_date: Option<String>,

    /// Limit the number of rows to process
    #[arg(long, env = "LIMIT", default_value_t = 10)]
    pub limit: usize,

    /// Run continuously instead of once
    #[arg(long)]
    pub continuous: bool,

    /// Interval between runs in seconds
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Force local mode (overrides auto-detection)
    #[arg(long)]
    pub local: bool,

    /// Force Kubernetes mode (overrides auto-detection)
    #[arg(long)]
    pub k8s: bool,

    /// Logging level
    #[arg(long, env = "LOG_LEVEL", value_enum, ignore_case = true, default_value = "INFO")]
    pub log_level: LogLevel,

    /// Log process CPU/memory at each ETL phase
    #[arg(long)]
    pub monitor: bool,

    /// Directory for rotated log files
    #[arg(long, default_value = "logs")]
    pub log_dir: String,

    /// Check the runtime is usable and exit
    #[arg(long)]
    pub health_check: bool,
}

impl AgentArgs {
    /// None 代表自動偵測
    pub fn mode_override(&self) -> Option<ExecutionMode> {
        match (self.local, self.k8s) {
            (true, true) => {
                tracing::warn!("Both --local and --k8s specified, using auto-detection");
                None
            }
            (true, false) => {
                tracing::info!("🏠 Forcing local mode due to --local flag");
                Some(ExecutionMode::Local)
            }
            (false, true) => {
                tracing::info!("☸️ Forcing Kubernetes mode due to --k8s flag");
                Some(ExecutionMode::Kubernetes)
            }
            (false, false) => None,
        }
    }
}
