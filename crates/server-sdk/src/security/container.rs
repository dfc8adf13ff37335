//! Credential and task-metadata lookups for container compute.

use std::time::Duration;

use serde::Deserialize;

pub const CONTAINER_CREDENTIAL_PROVIDER_URL: &str = "http://169.254.170.2";
pub const ENV_CONTAINER_CREDENTIALS_RELATIVE_URI: &str = "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";
pub const ENV_CONTAINER_METADATA_URI: &str = "ECS_CONTAINER_METADATA_URI_V4";
const TASK_METADATA_RELATIVE_PATH: &str = "task";

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("the environment variable {0} is not set")]
    EnvMissing(&'static str),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },
    #[error("{0} is not found in the response")]
    MissingField(&'static str),
    #[error("failed to extract task id from TaskARN {0:?}")]
    InvalidTaskArn(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTaskMetadata {
    pub task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsBody {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TaskBody {
    #[serde(rename = "TaskARN")]
    task_arn: Option<String>,
}

/// Task id is everything after the last `/` of the task ARN.
pub fn task_id_from_arn(arn: &str) -> Result<String, FetchError> {
    match arn.rfind('/') {
        Some(idx) if !arn.is_empty() => Ok(arn[idx + 1..].to_string()),
        _ => Err(FetchError::InvalidTaskArn(arn.to_string())),
    }
}

pub struct ContainerMetadataClient {
    http: reqwest::Client,
    credentials_base: String,
}

impl ContainerMetadataClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_credentials_base(CONTAINER_CREDENTIAL_PROVIDER_URL, timeout)
    }

    /// Point credential lookups at a different host.
    pub fn with_credentials_base(base: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            credentials_base: base.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_credentials(&self) -> Result<AwsCredentials, FetchError> {
        let relative = std::env::var(ENV_CONTAINER_CREDENTIALS_RELATIVE_URI)
            .map_err(|_| FetchError::EnvMissing(ENV_CONTAINER_CREDENTIALS_RELATIVE_URI))?;
        self.fetch_credentials_from(&relative).await
    }

    pub async fn fetch_credentials_from(&self, relative_uri: &str) -> Result<AwsCredentials, FetchError> {
        let url = format!("{}{relative_uri}", self.credentials_base);
        let body: CredentialsBody = self.get_json("container credential provider", &url).await?;
        Ok(AwsCredentials {
            access_key: body
                .access_key_id
                .ok_or(FetchError::MissingField("AccessKeyId"))?,
            secret_key: body
                .secret_access_key
                .ok_or(FetchError::MissingField("SecretAccessKey"))?,
            session_token: body.token.ok_or(FetchError::MissingField("Token"))?,
        })
    }

    pub async fn fetch_task_metadata(&self) -> Result<ContainerTaskMetadata, FetchError> {
        let base = std::env::var(ENV_CONTAINER_METADATA_URI)
            .map_err(|_| FetchError::EnvMissing(ENV_CONTAINER_METADATA_URI))?;
        self.fetch_task_metadata_from(&base).await
    }

    pub async fn fetch_task_metadata_from(&self, base_url: &str) -> Result<ContainerTaskMetadata, FetchError> {
        let url = format!("{}/{TASK_METADATA_RELATIVE_PATH}", base_url.trim_end_matches('/'));
        let body: TaskBody = self.get_json("container metadata service", &url).await?;
        let arn = body.task_arn.ok_or(FetchError::MissingField("TaskARN"))?;
        Ok(ContainerTaskMetadata {
            task_id: task_id_from_arn(&arn)?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
    ) -> Result<T, FetchError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status().as_u16();
        tracing::debug!(service, status, "container lookup");
        if !resp.status().is_success() {
            return Err(FetchError::Status { service, status });
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[test]
    fn task_id_is_arn_suffix() {
        assert_eq!(
            task_id_from_arn("arn:aws:ecs:us-west-2:123:task/cluster/abc123").unwrap(),
            "abc123"
        );
        assert!(task_id_from_arn("no-slash").is_err());
        assert!(task_id_from_arn("").is_err());
    }

    #[tokio::test]
    async fn credentials_are_parsed() {
        let base = serve_once(
            "200 OK",
            r#"{"AccessKeyId":"AKID","SecretAccessKey":"secret","Token":"tok","Expiration":"x"}"#,
        )
        .await;
        let client = ContainerMetadataClient::with_credentials_base(&base, Duration::from_secs(5)).unwrap();
        let creds = client.fetch_credentials_from("/v2/credentials/abc").await.unwrap();
        assert_eq!(creds.access_key, "AKID");
        assert_eq!(creds.session_token, "tok");
        assert!(!format!("{creds:?}").contains("secret"));
    }

    #[tokio::test]
    async fn missing_token_is_reported() {
        let base = serve_once("200 OK", r#"{"AccessKeyId":"AKID","SecretAccessKey":"s"}"#).await;
        let client = ContainerMetadataClient::with_credentials_base(&base, Duration::from_secs(5)).unwrap();
        let err = client.fetch_credentials_from("/creds").await.unwrap_err();
        assert!(matches!(err, FetchError::MissingField("Token")));
    }

    #[tokio::test]
    async fn task_metadata_error_status() {
        let base = serve_once("500 Internal Server Error", "{}").await;
        let client = ContainerMetadataClient::new(Duration::from_secs(5)).unwrap();
        let err = client.fetch_task_metadata_from(&base).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn task_metadata_yields_task_id() {
        let base = serve_once("200 OK", r#"{"TaskARN":"arn:aws:ecs:r:1:task/c/t-42"}"#).await;
        let client = ContainerMetadataClient::new(Duration::from_secs(5)).unwrap();
        let meta = client.fetch_task_metadata_from(&base).await.unwrap();
        assert_eq!(meta.task_id, "t-42");
    }
}
