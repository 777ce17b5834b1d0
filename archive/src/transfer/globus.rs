//! Globus Transfer API backend
//!
//! Every call submits one task per direction and waits for it to finish.
//! Per-file success comes from the task's successful transfer listing.

use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{TransferBackend, TransferDirection, TransferRequest, TransferResult};
use crate::config::GlobusConfig;
use crate::error::{ArchiveError, Result};

const BACKEND: &str = "globus";

#[derive(Error, Debug)]
enum GlobusError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("task still {0}")]
    Pending(String),
}

impl GlobusError {
    fn is_retryable(&self) -> bool {
        match self {
            GlobusError::Request(_) | GlobusError::Pending(_) => true,
            GlobusError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<GlobusError> for ArchiveError {
    fn from(error: GlobusError) -> Self {
        ArchiveError::transfer_error(BACKEND, error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SubmissionId {
    value: String,
}

#[derive(Debug, Serialize)]
struct TransferDocument<'a> {
    #[serde(rename = "DATA_TYPE")]
    data_type: &'static str,
    submission_id: String,
    source_endpoint: &'a str,
    destination_endpoint: &'a str,
    label: &'a str,
    verify_checksum: bool,
    #[serde(rename = "DATA")]
    data: Vec<TransferItem<'a>>,
}

#[derive(Debug, Serialize)]
struct TransferItem<'a> {
    #[serde(rename = "DATA_TYPE")]
    data_type: &'static str,
    source_path: &'a str,
    destination_path: &'a str,
}

#[derive(Debug, Deserialize)]
struct TaskSubmitted {
    task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskStatus {
    status: String,
    #[serde(default)]
    nice_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuccessfulTransfers {
    #[serde(rename = "DATA", default)]
    data: Vec<SuccessfulTransfer>,
    #[serde(default)]
    next_marker: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SuccessfulTransfer {
    source_path: String,
}

/// Transfers through the Globus Transfer REST API
pub struct GlobusTransfer {
    api_url: String,
    token: String,
    archive_endpoint: String,
    local_endpoint: String,
    label: String,
    poll_interval: Duration,
    task_timeout: Duration,
}

impl GlobusTransfer {
    /// Build from `[transfer.globus]`; the bearer token must be present in
    /// the configured environment variable
    pub fn from_config(config: &GlobusConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .map_err(|_| ArchiveError::config_error(format!("{} is not set", config.token_env)))?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            archive_endpoint: config.archive_endpoint.clone(),
            local_endpoint: config.local_endpoint.clone(),
            label: config.label.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
        })
    }

    /// `(source, destination)` endpoints for a direction
    fn endpoints(&self, direction: TransferDirection) -> (&str, &str) {
        match direction {
            TransferDirection::Fetch => (&self.archive_endpoint, &self.local_endpoint),
            TransferDirection::Ingest => (&self.local_endpoint, &self.archive_endpoint),
        }
    }

    fn document<'a>(
        &'a self,
        submission_id: String,
        direction: TransferDirection,
        requests: &[&'a TransferRequest],
    ) -> TransferDocument<'a> {
        let (source_endpoint, destination_endpoint) = self.endpoints(direction);
        TransferDocument {
            data_type: "transfer",
            submission_id,
            source_endpoint,
            destination_endpoint,
            label: &self.label,
            verify_checksum: true,
            data: requests
                .iter()
                .map(|request| TransferItem {
                    data_type: "transfer_item",
                    source_path: &request.source,
                    destination_path: &request.destination,
                })
                .collect(),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> std::result::Result<T, GlobusError> {
        let response = builder.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GlobusError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn submit(
        &self,
        client: &Client,
        direction: TransferDirection,
        requests: &[&TransferRequest],
    ) -> std::result::Result<String, GlobusError> {
        let submission: SubmissionId = self
            .send_json(client.get(format!("{}/submission_id", self.api_url)))
            .await?;

        let document = self.document(submission.value, direction, requests);
        let submitted: TaskSubmitted = self
            .send_json(client.post(format!("{}/transfer", self.api_url)).json(&document))
            .await?;

        info!(
            "Submitted Globus task {} ({} files, {} -> {})",
            submitted.task_id,
            requests.len(),
            document.source_endpoint,
            document.destination_endpoint
        );
        Ok(submitted.task_id)
    }

    /// Poll until the task leaves the active states
    async fn wait_for_task(&self, client: &Client, task_id: &str) -> Result<TaskStatus> {
        let policy = ExponentialBackoff {
            initial_interval: self.poll_interval,
            max_interval: self.poll_interval * 6,
            max_elapsed_time: Some(self.task_timeout),
            ..Default::default()
        };

        retry(policy, move || async move {
            let status: TaskStatus = self
                .send_json(client.get(format!("{}/task/{}", self.api_url, task_id)))
                .await
                .map_err(classify)?;

            match status.status.as_str() {
                "SUCCEEDED" | "FAILED" => Ok(status),
                other => {
                    debug!(
                        "Task {} is {} ({})",
                        task_id,
                        other,
                        status.nice_status.as_deref().unwrap_or("-")
                    );
                    Err(backoff::Error::transient(GlobusError::Pending(other.to_string())))
                }
            }
        })
        .await
        .map_err(|e| ArchiveError::transfer_error(BACKEND, format!("task {}: {}", task_id, e)))
    }

    /// Source paths the task reports as transferred
    async fn successful_sources(&self, client: &Client, task_id: &str) -> std::result::Result<HashSet<String>, GlobusError> {
        let mut sources = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let mut builder = client.get(format!("{}/task/{}/successful_transfers", self.api_url, task_id));
            if let Some(marker) = &marker {
                builder = builder.query(&[("marker", marker)]);
            }
            let page: SuccessfulTransfers = self.send_json(builder).await?;
            sources.extend(page.data.into_iter().map(|item| item.source_path));

            marker = match page.next_marker {
                None | Some(serde_json::Value::Null) => break,
                Some(serde_json::Value::String(text)) => Some(text),
                Some(other) => Some(other.to_string()),
            };
        }

        Ok(sources)
    }

    async fn transfer_group(
        &self,
        client: &Client,
        direction: TransferDirection,
        requests: &[&TransferRequest],
    ) -> Result<Vec<TransferResult>> {
        let task_id = self.submit(client, direction, requests).await?;
        let status = self.wait_for_task(client, &task_id).await?;

        if status.status == "FAILED" {
            warn!("Globus task {} failed", task_id);
        }
        let succeeded = self.successful_sources(client, &task_id).await?;

        Ok(collect_results(requests, &task_id, &status.status, &succeeded))
    }

    async fn transfer_all(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("archive-tools/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArchiveError::transfer_error(BACKEND, e.to_string()))?;

        let mut results: Vec<Option<TransferResult>> = vec![None; requests.len()];

        for direction in [TransferDirection::Fetch, TransferDirection::Ingest] {
            let (indices, group): (Vec<usize>, Vec<&TransferRequest>) = requests
                .iter()
                .enumerate()
                .filter(|(_, request)| request.direction == direction)
                .unzip();
            if group.is_empty() {
                continue;
            }

            let group_results = self.transfer_group(&client, direction, &group).await?;
            for (index, result) in indices.into_iter().zip(group_results) {
                results[index] = Some(result);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

impl TransferBackend for GlobusTransfer {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn blocking_transfer(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let runtime = super::runtime(BACKEND)?;
        runtime.block_on(self.transfer_all(requests))
    }
}

fn classify(error: GlobusError) -> backoff::Error<GlobusError> {
    if error.is_retryable() {
        warn!("Retrying Globus status poll: {}", error);
        backoff::Error::transient(error)
    } else {
        backoff::Error::permanent(error)
    }
}

fn collect_results(
    requests: &[&TransferRequest],
    task_id: &str,
    status: &str,
    succeeded: &HashSet<String>,
) -> Vec<TransferResult> {
    requests
        .iter()
        .map(|request| {
            if succeeded.contains(&request.source) {
                TransferResult::success(request, request.expected_size)
            } else {
                TransferResult::failure(
                    request,
                    format!("not transferred by task {} (status {})", task_id, status),
                )
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GlobusTransfer {
        GlobusTransfer {
            api_url: "https://transfer.example.org/v0.10".to_string(),
            token: "token".to_string(),
            archive_endpoint: "archive-ep".to_string(),
            local_endpoint: "local-ep".to_string(),
            label: "nightly".to_string(),
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_document_for_ingest() {
        let backend = backend();
        let request = TransferRequest::new("/jobs/1/a.fits", "/archive/raw/a.fits", TransferDirection::Ingest);
        let document = backend.document("sub-1".to_string(), TransferDirection::Ingest, &[&request]);

        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["DATA_TYPE"], "transfer");
        assert_eq!(json["submission_id"], "sub-1");
        assert_eq!(json["source_endpoint"], "local-ep");
        assert_eq!(json["destination_endpoint"], "archive-ep");
        assert_eq!(json["DATA"][0]["DATA_TYPE"], "transfer_item");
        assert_eq!(json["DATA"][0]["destination_path"], "/archive/raw/a.fits");
    }

    #[test]
    fn test_fetch_reads_from_archive_endpoint() {
        assert_eq!(backend().endpoints(TransferDirection::Fetch), ("archive-ep", "local-ep"));
    }

    #[test]
    fn test_collect_results() {
        let a = TransferRequest::new("/a", "/x/a", TransferDirection::Fetch).with_expected_size(Some(3));
        let b = TransferRequest::new("/b", "/x/b", TransferDirection::Fetch);
        let succeeded: HashSet<String> = ["/a".to_string()].into_iter().collect();

        let results = collect_results(&[&a, &b], "task-9", "FAILED", &succeeded);
        assert!(results[0].is_success());
        assert_eq!(results[0].bytes, Some(3));
        assert!(results[1].error.as_deref().unwrap().contains("task-9"));
    }

    #[test]
    fn test_successful_transfers_page() {
        let page: SuccessfulTransfers = serde_json::from_str(
            r#"{"DATA_TYPE": "successful_transfers", "next_marker": null,
                "DATA": [{"source_path": "/a", "destination_path": "/x/a"}]}"#,
        )
        .unwrap();
        assert_eq!(page.data[0].source_path, "/a");
        assert!(matches!(page.next_marker, None | Some(serde_json::Value::Null)));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GlobusError::Pending("ACTIVE".to_string()).is_retryable());
        assert!(GlobusError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!GlobusError::Api { status: 403, message: String::new() }.is_retryable());
    }

    #[test]
    fn test_missing_token() {
        let config = GlobusConfig {
            token_env: "ARCHIVE_TEST_UNSET_GLOBUS_TOKEN".to_string(),
            ..GlobusConfig::default()
        };
        assert!(matches!(GlobusTransfer::from_config(&config), Err(ArchiveError::Config(_))));
    }
}
