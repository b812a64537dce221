use clap::Parser;
use spark_etl_agent::adapters::notify::SmtpNotifier;
use spark_etl_agent::adapters::secrets::AwsSecretStore;
use spark_etl_agent::core::agent::{shutdown_channel, spawn_signal_listener, RunMode, EXIT_FAILURE, EXIT_SUCCESS};
use spark_etl_agent::core::notification::EmailService;
use spark_etl_agent::core::runtime::{health_check, resolve_mode, ExecutionMode, Session};
use spark_etl_agent::domain::ports::Notifier;
use spark_etl_agent::utils::logger;
use spark_etl_agent::{
    Agent, AgentArgs, AnyStorage, ConfiguredWarehouses, EtlError, JobConfig, JobService, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let args = AgentArgs::parse();

    let code = {
        // guard 要在 exit 前釋放，檔案日誌才會寫完
        let _guard = logger::init_agent_logger(args.log_level, Some(Path::new(&args.log_dir)));
        run(args).await
    };
    std::process::exit(code);
}

fn report(context: &str, e: &EtlError) {
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
}

async fn run(args: AgentArgs) -> i32 {
    tracing::info!("🚀 Starting Spark ETL Agent");
    tracing::info!("📋 Log level: {:?}", args.log_level);

    let secrets = AwsSecretStore::from_env().await;
    let settings = match Settings::load(secrets.as_ref()).await {
        Ok(settings) => settings,
        Err(e) => {
            report("Failed to load settings", &e);
            return EXIT_FAILURE;
        }
    };

    if args.health_check {
        let spark_home = std::env::var("SPARK_HOME").ok().map(PathBuf::from);
        return match health_check(&settings, spark_home.as_deref()) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                report("Health check failed", &e);
                EXIT_FAILURE
            }
        };
    }

    let mode = resolve_mode(args.mode_override());
    tracing::info!("🔧 Execution mode: {}", mode);

    let session = match Session::create(&settings, mode) {
        Ok(session) => session,
        Err(e) => {
            report("Failed to create session", &e);
            return EXIT_FAILURE;
        }
    };

    let code = match run_agent(&args, &settings, &session).await {
        Ok(code) => code,
        Err(e) => {
            report("Agent failed", &e);
            EXIT_FAILURE
        }
    };

    session.stop();
    tracing::info!("👋 Spark ETL Agent finished with exit code {}", code);
    code
}

async fn run_agent(args: &AgentArgs, settings: &Settings, session: &Session) -> spark_etl_agent::Result<i32> {
    let (job_config, source) = JobConfig::resolve(args)?;
    tracing::info!("📋 Job configuration from {:?}: {}", source, job_config.safe_display());

    let notifier: Option<Arc<dyn Notifier>> = match settings.smtp.as_ref().map(SmtpNotifier::new) {
        Some(Ok(notifier)) => Some(Arc::new(notifier) as Arc<dyn Notifier>),
        Some(Err(e)) => {
            tracing::warn!("⚠️ Email notifications disabled: {}", e);
            None
        }
        None => None,
    };

    let warehouses =
        ConfiguredWarehouses::new(settings.clone(), session.mode() == ExecutionMode::Local);
    let storage = AnyStorage::from_settings(settings).await;
    let jobs = JobService::new(settings, warehouses, storage, EmailService::new(settings, notifier))
        .with_parallelism(session.parallelism())
        .with_monitoring(args.monitor);

    if args.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    spawn_signal_listener(shutdown_tx);

    let agent = Agent::new(jobs, shutdown_rx);
    let run_mode = if args.continuous {
        RunMode::Continuous {
            interval: Duration::from_secs(args.interval),
        }
    } else {
        RunMode::Single
    };

    Ok(agent.run(&job_config, run_mode).await)
}
