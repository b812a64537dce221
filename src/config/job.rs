use crate::config::cli::{AgentArgs, DEFAULT_JOB_TYPE};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_file_extensions, Validate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_date: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// 其他欄位原樣保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "job id must be a string or number, got {}",
            other
        ))),
    }
}

/// 作業設定的來源，依優先順序
#[derive(Debug, Clone, PartialEq)]
pub enum JobSource {
    Inline,
    File(String),
    JobId,
}

impl JobConfig {
    pub fn from_job_id(id: &str, job_type: Option<&str>, load_date: Option<&str>, limit: usize) -> Self {
        Self {
            id: id.to_string(),
            name: Some(format!("Control M POC ETL Job {}", id)),
            job_type: Some(job_type.unwrap_or(DEFAULT_JOB_TYPE).to_string()),
            load_date: load_date.map(str::to_string),
            limit,
            extra: Map::new(),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| EtlError::ConfigValidationError {
            field: "job_config".to_string(),
            message: format!("Error parsing job configuration JSON: {}", e),
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EtlError::ConfigValidationError {
            field: "job_config_file".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 依副檔名解析 JSON 或 TOML，支援 ${VAR} 環境變數替換
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        validate_file_extensions("job_config_file", &[display.clone()], &["json", "toml"])?;

        let content = std::fs::read_to_string(path).map_err(EtlError::IoError)?;
        let content = substitute_env_vars(&content);

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// --job-config > --job-config-file > --job-id
    pub fn resolve(args: &AgentArgs) -> Result<(Self, JobSource)> {
        let (mut config, source) = if let Some(inline) = &args.job_config {
            (Self::from_json_str(inline)?, JobSource::Inline)
        } else if let Some(file) = &args.job_config_file {
            (Self::from_file(file)?, JobSource::File(file.clone()))
        } else if let Some(id) = &args.job_id {
            (
                Self::from_job_id(
                    id,
                    args.job_type.as_deref(),
                    args.load_date.as_deref(),
                    args.limit,
                ),
                JobSource::JobId,
            )
        } else {
            return Err(EtlError::MissingConfigError {
                field: "job configuration (use --job-id, --job-config, or --job-config-file)"
                    .to_string(),
            });
        };

        if config.job_type.is_none() {
            config.job_type = Some(DEFAULT_JOB_TYPE.to_string());
        }
        config.validate()?;
        Ok((config, source))
    }

    pub fn job_type(&self) -> &str {
        self.job_type.as_deref().unwrap_or(DEFAULT_JOB_TYPE)
    }

    pub fn job_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("job-{}", self.id))
    }

    /// 給日誌用，去掉 password
    pub fn safe_display(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("password");
        }
        value.to_string()
    }
}

impl Validate for JobConfig {
    fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_non_empty_string("id", &self.id)?;
        if let Some(date) = self.load_date.as_deref().filter(|d| !d.is_empty()) {
            crate::utils::validation::validate_date("load_date", date)?;
        }
        Ok(())
    }
}

fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::Builder;

    fn args(extra: &[&str]) -> AgentArgs {
        let mut argv = vec!["spark-etl-agent"];
        argv.extend_from_slice(extra);
        AgentArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_from_job_id_builds_control_m_config() {
        let config = JobConfig::from_job_id("opsumit_001", None, Some("2025-05-20"), 10);
        assert_eq!(config.name.as_deref(), Some("Control M POC ETL Job opsumit_001"));
        assert_eq!(config.job_type(), "control_m_poc_etl");
        assert_eq!(config.limit, 10);
    }

    #[test]
    fn test_inline_json_accepts_numeric_id_and_defaults() {
        let config = JobConfig::from_json_str(r#"{"id": 42, "custom": true}"#).unwrap();
        assert_eq!(config.id, "42");
        assert_eq!(config.limit, DEFAULT_LIMIT);
        assert_eq!(config.extra.get("custom"), Some(&Value::Bool(true)));
        assert!(config.job_type.is_none());
    }

    #[test]
    fn test_resolve_prefers_inline_config() {
        let (config, source) = JobConfig::resolve(&args(&[
            "--job-config",
            r#"{"id": "test_001", "limit": 5}"#,
            "--job-id",
            "ignored",
        ]))
        .unwrap();
        assert_eq!(source, JobSource::Inline);
        assert_eq!(config.id, "test_001");
        assert_eq!(config.limit, 5);
        assert_eq!(config.job_type(), "control_m_poc_etl");
    }

    #[test]
    fn test_resolve_rejects_bad_json_and_dates() {
        assert!(JobConfig::resolve(&args(&["--job-config", "{not json"])).is_err());
        assert!(JobConfig::resolve(&args(&[
            "--job-config",
            r#"{"id": "x", "load_date": "20-05-2025"}"#
        ]))
        .is_err());
    }

    #[test]
    fn test_job_config_file_json_and_toml() {
        std::env::set_var("SPARK_ETL_TEST_JOB_ID", "from_env");

        let mut json_file = Builder::new().suffix(".json").tempfile().unwrap();
        json_file
            .write_all(br#"{"id": "${SPARK_ETL_TEST_JOB_ID}", "type": "jcap_pa_etl"}"#)
            .unwrap();
        let config = JobConfig::from_file(json_file.path()).unwrap();
        assert_eq!(config.id, "from_env");
        assert_eq!(config.job_type(), "jcap_pa_etl");

        let mut toml_file = Builder::new().suffix(".toml").tempfile().unwrap();
        toml_file
            .write_all(b"id = \"toml_job\"\nlimit = 25\nload_date = \"2025-05-19\"\n")
            .unwrap();
        let config = JobConfig::from_file(toml_file.path()).unwrap();
        assert_eq!(config.id, "toml_job");
        assert_eq!(config.limit, 25);

        std::env::remove_var("SPARK_ETL_TEST_JOB_ID");
    }

    #[test]
    fn test_unsupported_file_extension() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(JobConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_safe_display_drops_password() {
        let config =
            JobConfig::from_json_str(r#"{"id": "a", "password": "secret", "user": "u"}"#).unwrap();
        let shown = config.safe_display();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("\"user\""));
    }
}
