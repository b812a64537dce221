//! Consistency checks between the SparkApplication descriptor, the image
//! contract and the agent's argument grammar.

use crate::config::cli::AgentArgs;
use crate::deploy::image::{default_argv, is_declared_env, IMAGE_NAME};
use crate::deploy::manifest::{
    token_mounts, SparkApplication, AWS_IAM_TOKEN_VOLUME, KUBE_API_TOKEN_VOLUME,
    ON_FAILURE_RETRIES, ON_FAILURE_RETRY_INTERVAL, ON_SUBMISSION_FAILURE_RETRIES,
    ON_SUBMISSION_FAILURE_RETRY_INTERVAL,
};
use clap::Parser;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub level: Level,
    pub field: String,
    pub message: String,
}

impl Finding {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            Level::Error => "ERROR",
            Level::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)
    }
}

pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(Finding::is_error)
}

/// 回傳所有發現的問題；沒有 Error 等級即為通過
pub fn check_manifest(app: &SparkApplication, expected_image: Option<&str>) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_image(app, expected_image, &mut findings);
    check_restart_policy(app, &mut findings);
    check_volumes(app, &mut findings);
    check_arguments(app, &mut findings);
    check_env_overrides(app, &mut findings);
    findings
}

fn check_image(app: &SparkApplication, expected: Option<&str>, findings: &mut Vec<Finding>) {
    let image = app.spec.image.as_str();
    match app.container_image_conf() {
        Some(conf) if conf == image => {}
        Some(conf) => findings.push(Finding::error(
            "spec.sparkConf",
            format!(
                "spark.kubernetes.container.image '{}' differs from spec.image '{}'",
                conf, image
            ),
        )),
        None => findings.push(Finding::error(
            "spec.sparkConf",
            "spark.kubernetes.container.image is not set",
        )),
    }

    if let Some(expected) = expected {
        if image != expected {
            findings.push(Finding::error(
                "spec.image",
                format!("'{}' does not match the published image '{}'", image, expected),
            ));
        }
    }

    let repository = image.rsplit('/').next().unwrap_or(image);
    if !repository.starts_with(IMAGE_NAME) {
        findings.push(Finding::warning(
            "spec.image",
            format!("'{}' is not a {} image", image, IMAGE_NAME),
        ));
    }
}

fn check_restart_policy(app: &SparkApplication, findings: &mut Vec<Finding>) {
    let policy = &app.spec.restart_policy;
    if policy.policy_type != "OnFailure" {
        findings.push(Finding::error(
            "spec.restartPolicy.type",
            format!("expected OnFailure, found {}", policy.policy_type),
        ));
    }

    let expect = |field: &str, actual: Option<u64>, wanted: u64, findings: &mut Vec<Finding>| {
        if actual != Some(wanted) {
            findings.push(Finding::error(
                field,
                format!(
                    "expected {}, found {}",
                    wanted,
                    actual.map(|v| v.to_string()).unwrap_or_else(|| "nothing".to_string())
                ),
            ));
        }
    };
    expect(
        "spec.restartPolicy.onFailureRetries",
        policy.on_failure_retries.map(u64::from),
        u64::from(ON_FAILURE_RETRIES),
        findings,
    );
    expect(
        "spec.restartPolicy.onFailureRetryInterval",
        policy.on_failure_retry_interval,
        ON_FAILURE_RETRY_INTERVAL,
        findings,
    );
    expect(
        "spec.restartPolicy.onSubmissionFailureRetries",
        policy.on_submission_failure_retries.map(u64::from),
        u64::from(ON_SUBMISSION_FAILURE_RETRIES),
        findings,
    );
    expect(
        "spec.restartPolicy.onSubmissionFailureRetryInterval",
        policy.on_submission_failure_retry_interval,
        ON_SUBMISSION_FAILURE_RETRY_INTERVAL,
        findings,
    );
}

fn check_volumes(app: &SparkApplication, findings: &mut Vec<Finding>) {
    for name in [AWS_IAM_TOKEN_VOLUME, KUBE_API_TOKEN_VOLUME] {
        if !app.spec.volumes.iter().any(|v| v.name == name) {
            findings.push(Finding::error(
                "spec.volumes",
                format!("projected token volume '{}' is not declared", name),
            ));
        }
    }

    let expected = token_mounts();
    for (role, pod) in [("driver", &app.spec.driver), ("executor", &app.spec.executor)] {
        let field = format!("spec.{}.volumeMounts", role);
        for mount in &expected {
            match pod.volume_mounts.iter().find(|m| m.name == mount.name) {
                Some(actual) if actual.mount_path != mount.mount_path => {
                    findings.push(Finding::error(
                        &field,
                        format!(
                            "'{}' mounted at {}, expected {}",
                            mount.name, actual.mount_path, mount.mount_path
                        ),
                    ))
                }
                Some(actual) if !actual.read_only => findings.push(Finding::error(
                    &field,
                    format!("'{}' must be mounted read-only", mount.name),
                )),
                Some(_) => {}
                None => findings.push(Finding::error(
                    &field,
                    format!("'{}' is not mounted", mount.name),
                )),
            }
        }
    }

    if app.spec.driver.volume_mounts != app.spec.executor.volume_mounts {
        findings.push(Finding::error(
            "spec.executor.volumeMounts",
            "driver and executor mounts differ",
        ));
    }
}

fn check_arguments(app: &SparkApplication, findings: &mut Vec<Finding>) {
    let argv = std::iter::once(IMAGE_NAME.to_string()).chain(app.spec.arguments.iter().cloned());
    if let Err(e) = AgentArgs::try_parse_from(argv) {
        findings.push(Finding::error(
            "spec.arguments",
            format!("rejected by the agent: {}", first_line(&e.to_string())),
        ));
    }

    if let Err(e) = AgentArgs::try_parse_from(default_argv()) {
        findings.push(Finding::error(
            "image.command",
            format!("default container command rejected: {}", first_line(&e.to_string())),
        ));
    }
}

fn check_env_overrides(app: &SparkApplication, findings: &mut Vec<Finding>) {
    for (role, pod) in [("driver", &app.spec.driver), ("executor", &app.spec.executor)] {
        for var in &pod.env {
            if !is_declared_env(&var.name) {
                findings.push(Finding::warning(
                    &format!("spec.{}.env", role),
                    format!("{} is not declared by the image", var.name),
                ));
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
