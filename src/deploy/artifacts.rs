use crate::deploy::image::ARTIFACT_PINS;
use crate::utils::error::{EtlError, Result};
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;

/// 下載一個固定版本的 jar；狀態碼非成功或內容為空都算失敗
pub async fn fetch_artifact(client: &Client, url: &str) -> Result<Bytes> {
    tracing::debug!("Downloading {}", url);
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(EtlError::ValidationError {
            message: format!("{} returned HTTP {}", url, status),
        });
    }

    let body = response.bytes().await?;
    if body.is_empty() {
        return Err(EtlError::ValidationError {
            message: format!("{} returned an empty body", url),
        });
    }
    Ok(body)
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactCheck {
    pub file_name: String,
    pub url: String,
    pub bytes: Option<usize>,
    pub error: Option<String>,
}

impl ArtifactCheck {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// (檔名, URL)
pub fn pinned_artifacts() -> Vec<(String, String)> {
    ARTIFACT_PINS
        .iter()
        .map(|pin| (pin.file_name(), pin.url.to_string()))
        .collect()
}

/// 逐一下載；有 `jars_dir` 時順便寫入該目錄
pub async fn verify_artifacts(
    client: &Client,
    artifacts: &[(String, String)],
    jars_dir: Option<&Path>,
) -> Vec<ArtifactCheck> {
    let mut checks = Vec::with_capacity(artifacts.len());
    for (file_name, url) in artifacts {
        let outcome = match fetch_artifact(client, url).await {
            Ok(body) => match jars_dir {
                Some(dir) => save(dir, file_name, &body).await.map(|_| body.len()),
                None => Ok(body.len()),
            },
            Err(e) => Err(e),
        };

        let check = match outcome {
            Ok(bytes) => {
                tracing::info!("✅ {} ({} bytes)", file_name, bytes);
                ArtifactCheck {
                    file_name: file_name.clone(),
                    url: url.clone(),
                    bytes: Some(bytes),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("❌ {}: {}", file_name, e);
                ArtifactCheck {
                    file_name: file_name.clone(),
                    url: url.clone(),
                    bytes: None,
                    error: Some(e.to_string()),
                }
            }
        };
        checks.push(check);
    }
    checks
}

async fn save(dir: &Path, file_name: &str, body: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(file_name), body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_artifacts_use_jar_file_names() {
        let artifacts = pinned_artifacts();
        assert_eq!(artifacts.len(), 3);
        assert_eq!(artifacts[0].0, "redshift-jdbc42-2.1.0.26.jar");
        assert!(artifacts.iter().all(|(name, url)| url.ends_with(name.as_str())));
    }
}
