use crate::config::settings::Settings;
use crate::deploy::image::ARTIFACT_PINS;
use crate::utils::error::{EtlError, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const KUBERNETES_HOST_PATTERNS: &[&str] = &["-pod-", "kubernetes"];
const DRIVER_HEADLESS_SERVICE: &str = "headless-spark-etl-jph";
const DRIVER_PORT: &str = "2223";
const EXECUTOR_INSTANCES: usize = 1;
const EXECUTOR_CORES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    Kubernetes,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Kubernetes => write!(f, "Kubernetes"),
        }
    }
}

/// 判斷執行環境所需的外部訊號，方便測試時替換
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    pub token_path: PathBuf,
    pub hostname: String,
    pub service_host: Option<String>,
}

impl EnvironmentProbe {
    pub fn current() -> Self {
        Self {
            token_path: PathBuf::from(SERVICE_ACCOUNT_TOKEN),
            hostname: crate::utils::monitor::host_name(),
            service_host: std::env::var("KUBERNETES_SERVICE_HOST").ok(),
        }
    }

    pub fn detect(&self) -> ExecutionMode {
        if self.token_path.exists() {
            tracing::info!("Detected Kubernetes environment (service account token exists)");
            return ExecutionMode::Kubernetes;
        }

        if KUBERNETES_HOST_PATTERNS
            .iter()
            .any(|p| self.hostname.contains(p))
        {
            tracing::info!(
                "Detected Kubernetes environment (hostname: {})",
                self.hostname
            );
            return ExecutionMode::Kubernetes;
        }

        if self.service_host.is_some() {
            tracing::info!("Detected Kubernetes environment (from environment variables)");
            return ExecutionMode::Kubernetes;
        }

        tracing::info!("No Kubernetes indicators found, assuming local environment");
        ExecutionMode::Local
    }
}

/// 指定的模式優先，否則自動偵測
pub fn resolve_mode(explicit: Option<ExecutionMode>) -> ExecutionMode {
    explicit.unwrap_or_else(|| EnvironmentProbe::current().detect())
}

/// 一次 agent 執行期間的運算環境設定
#[derive(Debug)]
pub struct Session {
    app_name: String,
    mode: ExecutionMode,
    master: String,
    app_id: String,
    conf: BTreeMap<String, String>,
    driver_available: bool,
    stopped: AtomicBool,
}

impl Session {
    pub fn create(settings: &Settings, mode: ExecutionMode) -> Result<Self> {
        tracing::info!("Creating session in {} mode", mode);

        let mut conf = BTreeMap::new();
        let mut set = |key: &str, value: &str| {
            conf.insert(key.to_string(), value.to_string());
        };

        let master = match mode {
            ExecutionMode::Local => {
                set("spark.driver.host", "localhost");
                set("spark.driver.bindAddress", "127.0.0.1");
                set("spark.driver.memory", &settings.spark_driver_memory);
                set("spark.sql.execution.arrow.pyspark.enabled", "true");
                set("spark.sql.repl.eagerEval.enabled", "true");
                "local[*]".to_string()
            }
            ExecutionMode::Kubernetes => {
                set(
                    "spark.kubernetes.authenticate.driver.serviceAccountName",
                    &settings.k8s_service_account,
                );
                set(
                    "spark.kubernetes.container.image",
                    &settings.k8s_container_image,
                );
                set(
                    "spark.kubernetes.container.image.pullSecrets",
                    &settings.k8s_image_pull_secrets,
                );
                set("spark.kubernetes.namespace", &settings.k8s_namespace);
                set("spark.executor.instances", &EXECUTOR_INSTANCES.to_string());
                set("spark.driver.memory", &settings.spark_driver_memory);
                set("spark.executor.memory", &settings.spark_executor_memory);
                set("spark.kubernetes.executor.limit.cores", "1");
                set("spark.kubernetes.driver.limit.cores", "1");
                set("spark.kubernetes.driver.request.cores", "0.2");
                set("spark.kubernetes.executor.request.cores", "0.2");
                set("spark.driver.host", DRIVER_HEADLESS_SERVICE);
                set("spark.driver.port", DRIVER_PORT);
                tracing::info!("headless service already created, skipping creation step");
                format!("k8s://{}", settings.k8s_master_url)
            }
        };

        if settings.spark_app_name.trim().is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "SPARK_APP_NAME".to_string(),
            });
        }
        set("spark.app.name", &settings.spark_app_name);

        let jdbc_path = &settings.redshift_jdbc_driver_path;
        let driver_available = Path::new(jdbc_path).exists();
        if driver_available {
            tracing::info!("Added JDBC driver from: {}", jdbc_path);
            set("spark.jars", jdbc_path);
        } else if mode == ExecutionMode::Local {
            tracing::warn!("JDBC driver not found at {}, using mock data mode", jdbc_path);
        }

        let millis = Utc::now().timestamp_millis();
        let app_id = match mode {
            ExecutionMode::Local => format!("local-{}", millis),
            ExecutionMode::Kubernetes => format!("spark-{}", millis),
        };

        tracing::info!("Session created successfully");
        tracing::info!("App ID: {}, master: {}", app_id, master);

        Ok(Self {
            app_name: settings.spark_app_name.clone(),
            mode,
            master,
            app_id,
            conf,
            driver_available,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn conf(&self) -> &BTreeMap<String, String> {
        &self.conf
    }

    pub fn conf_value(&self, key: &str) -> Option<&str> {
        self.conf.get(key).map(String::as_str)
    }

    pub fn driver_available(&self) -> bool {
        self.driver_available
    }

    /// 同時寫入倉儲的批次上限
    pub fn parallelism(&self) -> usize {
        match self.mode {
            ExecutionMode::Local => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            ExecutionMode::Kubernetes => EXECUTOR_INSTANCES * EXECUTOR_CORES,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// 可重複呼叫，只有第一次會記錄
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping session...");
        tracing::info!("Session (ID: {}) stopped successfully", self.app_id);
        if self.mode == ExecutionMode::Kubernetes {
            tracing::info!("headless service should be always up, skipping deletion step");
        }
    }
}

/// 映像健康檢查：能建立 session，且 SPARK_HOME 下有固定版本的 jar
pub fn health_check(settings: &Settings, spark_home: Option<&Path>) -> Result<()> {
    let session = Session::create(settings, ExecutionMode::Local)?;
    session.stop();

    if let Some(home) = spark_home {
        let jars = home.join("jars");
        let missing: Vec<String> = ARTIFACT_PINS
            .iter()
            .map(|pin| pin.file_name())
            .filter(|name| !jars.join(name).exists())
            .collect();
        if !missing.is_empty() {
            return Err(EtlError::ValidationError {
                message: format!(
                    "Missing jars under {}: {}",
                    jars.display(),
                    missing.join(", ")
                ),
            });
        }
    }

    tracing::info!("✅ Health check passed");
    Ok(())
}
