use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{path} does not exist and {variable} is not set")]
    Missing { path: String, variable: &'static str },
    #[error("invalid GITHUB_TOKEN")]
    InvalidToken,
    #[error("failed to download {url}: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("failed to download {url}: server answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Makes sure the model graph and class list are on disk, downloading the
/// missing ones from their configured URLs.
pub async fn ensure_artifacts(config: &Config) -> Result<(), ArtifactError> {
    info!("checking model artifacts");
    let client = reqwest::Client::new();
    let token = config.github_token.as_deref();

    ensure_file(
        &client,
        &config.model_path,
        config.model_url.as_deref(),
        "MODEL_URL",
        token,
    )
    .await?;
    ensure_file(
        &client,
        &config.class_list_path,
        config.class_list_url.as_deref(),
        "CLASS_LIST_URL",
        token,
    )
    .await
}

async fn ensure_file(
    client: &reqwest::Client,
    path: &Path,
    url: Option<&str>,
    variable: &'static str,
    token: Option<&str>,
) -> Result<(), ArtifactError> {
    if path.exists() {
        debug!("{} already present", path.display());
        return Ok(());
    }

    let url = url.ok_or_else(|| ArtifactError::Missing {
        path: path.display().to_string(),
        variable,
    })?;
    download_file(client, url, path, token).await
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    token: Option<&str>,
) -> Result<(), ArtifactError> {
    info!("downloading {} from {}", path.display(), url);

    let mut header_map = HeaderMap::new();
    if let Some(token) = token {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ArtifactError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let request_error = |source: reqwest::Error| ArtifactError::Request {
        url: url.to_string(),
        source,
    };
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .map_err(request_error)?;

    if !response.status().is_success() {
        return Err(ArtifactError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response.bytes().await.map_err(request_error)?;

    let write_error = |source: std::io::Error| ArtifactError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_error)?;
    }
    tokio::fs::write(path, &bytes).await.map_err(write_error)?;
    info!("wrote {} ({} bytes)", path.display(), bytes.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config(model_path: PathBuf, class_list_path: PathBuf) -> Config {
        Config {
            port: 0,
            body_limit_bytes: None,
            model_path,
            class_list_path,
            model_url: None,
            class_list_url: None,
            github_token: None,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("leaf-doctor-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn present_files_are_left_alone() {
        let dir = scratch_dir("present");
        let model = dir.join("best.pb");
        let classes = dir.join("class_list.txt");
        std::fs::write(&model, b"graph").unwrap();
        std::fs::write(&classes, b"healthy\n").unwrap();

        ensure_artifacts(&config(model.clone(), classes)).await.unwrap();

        assert_eq!(std::fs::read(&model).unwrap(), b"graph");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn missing_file_without_url_names_the_variable() {
        let dir = scratch_dir("missing");
        let model = dir.join("best.pb");
        std::fs::write(&model, b"graph").unwrap();

        let err = ensure_artifacts(&config(model, dir.join("class_list.txt")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ArtifactError::Missing {
                variable: "CLASS_LIST_URL",
                ..
            }
        ));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
