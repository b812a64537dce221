//! Typed `SparkApplication` custom resource (sparkoperator.k8s.io/v1beta2).

use crate::deploy::image::{AGENT_BINARY, DEFAULT_IMAGE, SPARK_UI_PORT};
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const API_VERSION: &str = "sparkoperator.k8s.io/v1beta2";
pub const KIND: &str = "SparkApplication";

/// 描述檔開頭的說明：只作部署契約，不直接套用
pub const CONTRACT_NOTE: &str = "\
# Contract-only descriptor, verified by `deploy check`.
# type/mainApplicationFile follow the operator contract, but the agent is a
# native binary: the operator would spark-submit it as a Python file, so this
# descriptor is not meant to be applied unchanged.
";

pub const SPARK_VERSION: &str = "3.5.0";

pub const AWS_IAM_TOKEN_VOLUME: &str = "aws-iam-token";
pub const AWS_IAM_TOKEN_PATH: &str = "/var/run/secrets/eks.amazonaws.com/serviceaccount";
pub const AWS_IAM_TOKEN_AUDIENCE: &str = "sts.amazonaws.com";
pub const AWS_IAM_TOKEN_EXPIRATION: u64 = 86400;
pub const KUBE_API_TOKEN_VOLUME: &str = "kube-api-token";
pub const KUBE_API_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const KUBE_API_TOKEN_EXPIRATION: u64 = 3607;

pub const ON_FAILURE_RETRIES: u32 = 3;
pub const ON_FAILURE_RETRY_INTERVAL: u64 = 10;
pub const ON_SUBMISSION_FAILURE_RETRIES: u32 = 5;
pub const ON_SUBMISSION_FAILURE_RETRY_INTERVAL: u64 = 20;

pub const CONTAINER_IMAGE_CONF: &str = "spark.kubernetes.container.image";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplication {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: SparkApplicationSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationSpec {
    #[serde(rename = "type")]
    pub app_type: String,
    pub mode: String,
    pub image: String,
    pub image_pull_policy: String,
    pub main_application_file: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub spark_version: String,
    #[serde(default)]
    pub spark_conf: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    pub driver: PodSpec,
    pub executor: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicy {
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure_retry_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_submission_failure_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_submission_failure_retry_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub projected: ProjectedVolume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedVolume {
    pub sources: Vec<ProjectionSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSource {
    pub service_account_token: ServiceAccountToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    pub expiration_seconds: u64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub cores: u32,
    pub core_limit: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
    pub service_account: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// 產生描述檔時可調整的部分
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentProfile {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub service_account: String,
    pub job_id: String,
    pub limit: usize,
    pub k8s: bool,
    pub continuous: bool,
    pub load_date: Option<String>,
    pub log_level: Option<String>,
    pub driver_memory: String,
    pub executor_memory: String,
    pub executor_instances: u32,
    pub cores: u32,
    pub core_limit: String,
    /// 覆寫映像內的環境變數預設值
    pub env: Vec<(String, String)>,
}

impl Default for DeploymentProfile {
    fn default() -> Self {
        Self {
            name: "spark-etl-agent".to_string(),
            namespace: "default".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            service_account: "spark".to_string(),
            job_id: "1".to_string(),
            limit: 10,
            k8s: false,
            continuous: false,
            load_date: None,
            log_level: None,
            driver_memory: "1g".to_string(),
            executor_memory: "1g".to_string(),
            executor_instances: 1,
            cores: 1,
            core_limit: "1200m".to_string(),
            env: vec![
                ("LOG_LEVEL".to_string(), "INFO".to_string()),
                ("AWS_DEFAULT_REGION".to_string(), "us-east-1".to_string()),
            ],
        }
    }
}

impl DeploymentProfile {
    /// `--job-id <id> --limit <n>` 加上選用旗標
    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "--job-id".to_string(),
            self.job_id.clone(),
            "--limit".to_string(),
            self.limit.to_string(),
        ];
        if self.k8s {
            args.push("--k8s".to_string());
        }
        if self.continuous {
            args.push("--continuous".to_string());
        }
        if let Some(date) = &self.load_date {
            args.extend(["--load-date".to_string(), date.clone()]);
        }
        if let Some(level) = &self.log_level {
            args.extend(["--log-level".to_string(), level.clone()]);
        }
        args
    }
}

fn token_volume(name: &str, audience: Option<&str>, expiration_seconds: u64) -> Volume {
    Volume {
        name: name.to_string(),
        projected: ProjectedVolume {
            sources: vec![ProjectionSource {
                service_account_token: ServiceAccountToken {
                    audience: audience.map(str::to_string),
                    expiration_seconds,
                    path: "token".to_string(),
                },
            }],
        },
    }
}

/// driver 與 executor 共用的唯讀掛載
pub fn token_mounts() -> Vec<VolumeMount> {
    [
        (AWS_IAM_TOKEN_VOLUME, AWS_IAM_TOKEN_PATH),
        (KUBE_API_TOKEN_VOLUME, KUBE_API_TOKEN_PATH),
    ]
    .iter()
    .map(|(name, path)| VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: true,
    })
    .collect()
}

impl SparkApplication {
    pub fn from_profile(profile: &DeploymentProfile) -> Self {
        let spark_conf: BTreeMap<String, String> = [
            (CONTAINER_IMAGE_CONF, profile.image.as_str()),
            ("spark.sql.adaptive.enabled", "true"),
            ("spark.sql.adaptive.coalescePartitions.enabled", "true"),
            ("spark.serializer", "org.apache.spark.serializer.KryoSerializer"),
            (
                "spark.hadoop.fs.s3a.aws.credentials.provider",
                "com.amazonaws.auth.WebIdentityTokenCredentialsProvider",
            ),
            ("spark.kubernetes.driver.limit.cores", "1"),
            ("spark.kubernetes.executor.limit.cores", "1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let labels = BTreeMap::from([("version".to_string(), SPARK_VERSION.to_string())]);

        let driver = PodSpec {
            cores: profile.cores,
            core_limit: profile.core_limit.clone(),
            memory: profile.driver_memory.clone(),
            instances: None,
            service_account: profile.service_account.clone(),
            labels: labels.clone(),
            env: profile
                .env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            ports: vec![ContainerPort {
                name: "spark-ui".to_string(),
                container_port: SPARK_UI_PORT,
                protocol: "TCP".to_string(),
            }],
            volume_mounts: token_mounts(),
        };

        let executor = PodSpec {
            cores: profile.cores,
            core_limit: profile.core_limit.clone(),
            memory: profile.executor_memory.clone(),
            instances: Some(profile.executor_instances),
            service_account: profile.service_account.clone(),
            labels,
            env: Vec::new(),
            ports: Vec::new(),
            volume_mounts: token_mounts(),
        };

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata {
                name: profile.name.clone(),
                namespace: profile.namespace.clone(),
            },
            spec: SparkApplicationSpec {
                app_type: "Python".to_string(),
                mode: "cluster".to_string(),
                image: profile.image.clone(),
                image_pull_policy: "Always".to_string(),
                main_application_file: format!("local://{}", AGENT_BINARY),
                arguments: profile.arguments(),
                spark_version: SPARK_VERSION.to_string(),
                spark_conf,
                restart_policy: RestartPolicy {
                    policy_type: "OnFailure".to_string(),
                    on_failure_retries: Some(ON_FAILURE_RETRIES),
                    on_failure_retry_interval: Some(ON_FAILURE_RETRY_INTERVAL),
                    on_submission_failure_retries: Some(ON_SUBMISSION_FAILURE_RETRIES),
                    on_submission_failure_retry_interval: Some(
                        ON_SUBMISSION_FAILURE_RETRY_INTERVAL,
                    ),
                },
                volumes: vec![
                    token_volume(
                        AWS_IAM_TOKEN_VOLUME,
                        Some(AWS_IAM_TOKEN_AUDIENCE),
                        AWS_IAM_TOKEN_EXPIRATION,
                    ),
                    token_volume(KUBE_API_TOKEN_VOLUME, None, KUBE_API_TOKEN_EXPIRATION),
                ],
                driver,
                executor,
            },
        }
    }

    /// 輸出開頭帶 [`CONTRACT_NOTE`]
    pub fn to_yaml(&self) -> Result<String> {
        Ok(format!("{}{}", CONTRACT_NOTE, serde_yaml::to_string(self)?))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let app: Self = serde_yaml::from_str(content)?;
        if app.kind != KIND {
            return Err(EtlError::ValidationError {
                message: format!("Expected kind {}, found {}", KIND, app.kind),
            });
        }
        Ok(app)
    }

    pub fn container_image_conf(&self) -> Option<&str> {
        self.spec.spark_conf.get(CONTAINER_IMAGE_CONF).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_manifest() {
        let app = SparkApplication::from_profile(&DeploymentProfile::default());

        assert_eq!(app.api_version, API_VERSION);
        assert_eq!(app.spec.image, DEFAULT_IMAGE);
        assert_eq!(app.container_image_conf(), Some(DEFAULT_IMAGE));
        assert_eq!(app.spec.arguments, vec!["--job-id", "1", "--limit", "10"]);
        assert_eq!(app.spec.restart_policy.on_failure_retries, Some(3));
        assert_eq!(app.spec.restart_policy.on_submission_failure_retry_interval, Some(20));
        assert_eq!(app.spec.volumes.len(), 2);
        assert_eq!(app.spec.driver.volume_mounts, app.spec.executor.volume_mounts);
        assert_eq!(app.spec.driver.ports[0].container_port, 4040);
        assert_eq!(app.spec.executor.instances, Some(1));
    }

    #[test]
    fn test_optional_arguments() {
        let profile = DeploymentProfile {
            k8s: true,
            continuous: true,
            load_date: Some("2025-05-19".to_string()),
            log_level: Some("DEBUG".to_string()),
            ..Default::default()
        };
        assert_eq!(
            profile.arguments(),
            vec![
                "--job-id", "1", "--limit", "10", "--k8s", "--continuous", "--load-date",
                "2025-05-19", "--log-level", "DEBUG"
            ]
        );
    }

    #[test]
    fn test_yaml_uses_operator_field_names() {
        let yaml = SparkApplication::from_profile(&DeploymentProfile::default())
            .to_yaml()
            .unwrap();
        assert!(yaml.starts_with(CONTRACT_NOTE));
        assert!(yaml.contains("apiVersion: sparkoperator.k8s.io/v1beta2"));
        assert!(yaml.contains("mainApplicationFile: local:///app/bin/spark-etl-agent"));
        assert!(yaml.contains("onSubmissionFailureRetries: 5"));
        assert!(yaml.contains("serviceAccountToken:"));
        assert!(yaml.contains("readOnly: true"));
        assert!(yaml.contains("audience: sts.amazonaws.com"));

        let parsed = SparkApplication::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, SparkApplication::from_profile(&DeploymentProfile::default()));
    }

    #[test]
    fn test_from_yaml_rejects_other_kinds() {
        let yaml = SparkApplication::from_profile(&DeploymentProfile::default())
            .to_yaml()
            .unwrap()
            .replace("kind: SparkApplication", "kind: ScheduledSparkApplication");
        assert!(SparkApplication::from_yaml(&yaml).is_err());
    }
}
