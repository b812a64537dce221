use crate::domain::ports::SecretSource;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::config::Region;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_secretsmanager::Client as SecretsClient;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::OnceCell;

pub const DEFAULT_SECRETS_REGION: &str = "us-east-1";

/// AWS Secrets Manager 上的 JSON secret，第一次取回後快取
pub struct AwsSecretStore {
    client: SecretsClient,
    secret_name: String,
    cache: OnceCell<HashMap<String, String>>,
}

impl AwsSecretStore {
    pub fn new(client: SecretsClient, secret_name: impl Into<String>) -> Self {
        Self {
            client,
            secret_name: secret_name.into(),
            cache: OnceCell::new(),
        }
    }

    /// AWS_SECRET_NAME 有設定才建立
    pub async fn from_env() -> Option<Self> {
        let secret_name = std::env::var("AWS_SECRET_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SECRETS_REGION.to_string());

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        tracing::info!("🔐 Secrets Manager initialized for secret: {}", secret_name);
        tracing::info!("🌍 Region: {}", region);
        Some(Self::new(SecretsClient::new(&config), secret_name))
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    async fn retrieve(&self) -> Result<HashMap<String, String>> {
        tracing::info!("🔍 Retrieving secret: {}", self.secret_name);

        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_name)
            .send()
            .await
            .map_err(|e| {
                let code = e.code().unwrap_or("Unknown").to_string();
                tracing::error!(
                    "❌ Failed to retrieve secret {}: {}",
                    self.secret_name,
                    code
                );
                if let Some(hint) = error_hint(&code) {
                    tracing::error!("{}", hint);
                }
                EtlError::SecretsError {
                    message: format!(
                        "Cannot read secret {}: {}",
                        self.secret_name,
                        DisplayErrorContext(e)
                    ),
                }
            })?;

        let secret_string = response.secret_string().ok_or_else(|| EtlError::SecretsError {
            message: format!("Secret {} has no string value", self.secret_name),
        })?;

        let values = parse_secret_string(secret_string)?;
        tracing::info!("✅ Successfully retrieved secret with {} keys", values.len());
        tracing::debug!("🔑 Secret keys: {:?}", {
            let mut keys: Vec<&String> = values.keys().collect();
            keys.sort();
            keys
        });
        Ok(values)
    }
}

#[async_trait]
impl SecretSource for AwsSecretStore {
    async fn fetch(&self) -> Result<HashMap<String, String>> {
        self.cache
            .get_or_try_init(|| self.retrieve())
            .await
            .cloned()
    }
}

/// JSON 物件轉成字串對照表；非字串值取其 JSON 表示
pub fn parse_secret_string(secret_string: &str) -> Result<HashMap<String, String>> {
    let value: Value = serde_json::from_str(secret_string).map_err(|e| {
        tracing::error!("❌ Failed to parse secret JSON: {}", e);
        EtlError::SecretsError {
            message: format!("Secret is not valid JSON: {}", e),
        }
    })?;

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect()),
        _ => Err(EtlError::SecretsError {
            message: "Secret must be a JSON object".to_string(),
        }),
    }
}

fn error_hint(code: &str) -> Option<&'static str> {
    match code {
        "DecryptionFailureException" => {
            Some("Secret can't be decrypted using the provided KMS key")
        }
        "InternalServiceErrorException" => Some("An error occurred on the server side"),
        "InvalidParameterException" => Some("Invalid parameter provided"),
        "InvalidRequestException" => Some("Invalid request parameter"),
        "ResourceNotFoundException" => {
            Some("Secret not found - please verify secret name and permissions")
        }
        "AccessDeniedException" => {
            Some("Access denied - please verify IAM permissions for Secrets Manager")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_values_are_stringified() {
        let values = parse_secret_string(
            r#"{"REDSHIFT_HOST": "h", "REDSHIFT_PORT": 5439, "SMTP_USE_TLS": true, "EMPTY": null}"#,
        )
        .unwrap();
        assert_eq!(values["REDSHIFT_HOST"], "h");
        assert_eq!(values["REDSHIFT_PORT"], "5439");
        assert_eq!(values["SMTP_USE_TLS"], "true");
        assert!(!values.contains_key("EMPTY"));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_secret_string("[1, 2]").is_err());
        assert!(parse_secret_string("not json").is_err());
    }

    #[test]
    fn test_error_hints() {
        assert!(error_hint("AccessDeniedException")
            .unwrap()
            .contains("IAM permissions"));
        assert!(error_hint("Throttling").is_none());
    }
}
