//! Container image contract: env defaults, pinned driver jars and the
//! default command. The Dockerfile and the SparkApplication descriptor are
//! both checked against these values.

use serde::Serialize;

pub const IMAGE_NAME: &str = "spark-etl-agent";
pub const DEFAULT_IMAGE: &str = concat!("spark-etl-agent:", env!("CARGO_PKG_VERSION"));
pub const SPARK_HOME: &str = "/opt/spark";
pub const AGENT_BINARY: &str = "/app/bin/spark-etl-agent";
pub const SPARK_UI_PORT: u16 = 4040;

/// 映像內的預設啟動參數
pub const DEFAULT_COMMAND: &[&str] = &[
    "--local",
    "--continuous",
    "--job-type",
    "control_m_poc_etl",
    "--job-id",
    "3",
    "--load-date",
    "2025-05-19",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvDefault {
    pub name: &'static str,
    /// None 表示只宣告、不給預設值
    pub value: Option<&'static str>,
}

const fn env(name: &'static str, value: &'static str) -> EnvDefault {
    EnvDefault {
        name,
        value: Some(value),
    }
}

pub const ENV_DEFAULTS: &[EnvDefault] = &[
    env("PYTHONUNBUFFERED", "1"),
    env("PYTHONDONTWRITEBYTECODE", "1"),
    env("PYSPARK_PYTHON", "python3"),
    env("PYSPARK_DRIVER_PYTHON", "python3"),
    env("PYSPARK_MAJOR_PYTHON_VERSION", "3"),
    env("SPARK_HOME", SPARK_HOME),
    env("PATH", "/opt/spark/bin:/app/bin:$PATH"),
    env("PYTHONPATH", "/app"),
    env("JOB_ID", "1"),
    env("LOAD_DATE", "2025-05-19"),
    env("LOG_LEVEL", "INFO"),
    env("LIMIT", "10"),
    EnvDefault {
        name: "AWS_SECRET_NAME",
        value: None,
    },
    env("AWS_DEFAULT_REGION", "us-east-1"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactPin {
    pub name: &'static str,
    pub version: &'static str,
    pub url: &'static str,
}

impl ArtifactPin {
    pub fn file_name(&self) -> String {
        format!("{}-{}.jar", self.name, self.version)
    }
}

pub const REDSHIFT_JDBC: ArtifactPin = ArtifactPin {
    name: "redshift-jdbc42",
    version: "2.1.0.26",
    url: "https://s3.amazonaws.com/redshift-downloads/drivers/jdbc/2.1.0.26/redshift-jdbc42-2.1.0.26.jar",
};

pub const AWS_SDK_BUNDLE: ArtifactPin = ArtifactPin {
    name: "aws-java-sdk-bundle",
    version: "1.12.262",
    url: "https://repo1.maven.org/maven2/com/amazonaws/aws-java-sdk-bundle/1.12.262/aws-java-sdk-bundle-1.12.262.jar",
};

pub const HADOOP_AWS: ArtifactPin = ArtifactPin {
    name: "hadoop-aws",
    version: "3.3.4",
    url: "https://repo1.maven.org/maven2/org/apache/hadoop/hadoop-aws/3.3.4/hadoop-aws-3.3.4.jar",
};

pub const ARTIFACT_PINS: &[ArtifactPin] = &[REDSHIFT_JDBC, AWS_SDK_BUNDLE, HADOOP_AWS];

pub fn env_default(name: &str) -> Option<&'static EnvDefault> {
    ENV_DEFAULTS.iter().find(|e| e.name == name)
}

pub fn is_declared_env(name: &str) -> bool {
    env_default(name).is_some()
}

pub fn jars_dir() -> String {
    format!("{}/jars", SPARK_HOME)
}

pub fn redshift_driver_path() -> String {
    format!("{}/{}", jars_dir(), REDSHIFT_JDBC.file_name())
}

/// 完整的容器啟動指令 (entrypoint + 預設參數)
pub fn default_argv() -> Vec<String> {
    std::iter::once(IMAGE_NAME)
        .chain(DEFAULT_COMMAND.iter().copied())
        .map(str::to_string)
        .collect()
}
