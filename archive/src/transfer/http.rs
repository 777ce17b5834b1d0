//! WebDAV transfers: GET to fetch, MKCOL + PUT to ingest

use futures_util::stream::{self, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use super::{staging_path, TransferBackend, TransferDirection, TransferRequest, TransferResult};
use crate::config::HttpConfig;
use crate::error::{ArchiveError, Result};

const BACKEND: &str = "http";

#[derive(Error, Debug)]
enum HttpFailure {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("local file error: {0}")]
    Io(#[from] io::Error),

    #[error("size mismatch: expected {expected}, transferred {actual}")]
    Size { expected: u64, actual: u64 },
}

/// WebDAV client with optional basic auth and bounded concurrency
pub struct HttpTransfer {
    username: Option<String>,
    password: Option<String>,
    concurrency: usize,
    timeout: Duration,
}

impl HttpTransfer {
    pub fn new(username: Option<String>, password: Option<String>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            username,
            password,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Build from `[transfer.http]`, reading the password from its
    /// environment variable
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let password = std::env::var(&config.password_env).ok();
        if config.username.is_some() && password.is_none() {
            warn!("{} is not set, authenticating without a password", config.password_env);
        }

        Ok(Self::new(
            config.username.clone(),
            password,
            config.concurrency,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn client(&self) -> Result<Client> {
        ClientBuilder::new()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("archive-tools/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArchiveError::transfer_error(BACKEND, e.to_string()))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    async fn transfer_all(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        let client = self.client()?;

        let mut collections = BTreeSet::new();
        for request in requests.iter().filter(|r| r.direction == TransferDirection::Ingest) {
            match parent_collections(&request.destination) {
                Ok(parents) => collections.extend(parents),
                Err(e) => warn!("Cannot parse destination URL {}: {}", request.destination, e),
            }
        }

        // Sorted order creates every parent before its children
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| ArchiveError::transfer_error(BACKEND, e.to_string()))?;
        for collection in &collections {
            self.make_collection(&client, mkcol.clone(), collection).await;
        }

        let results = stream::iter(requests)
            .map(|request| {
                let client = &client;
                async move {
                    let outcome = match request.direction {
                        TransferDirection::Fetch => self.download(client, request).await,
                        TransferDirection::Ingest => self.upload(client, request).await,
                    };
                    match outcome {
                        Ok(bytes) => {
                            debug!("Transferred {} -> {} ({} bytes)", request.source, request.destination, bytes);
                            TransferResult::success(request, Some(bytes))
                        }
                        Err(e) => {
                            warn!("Transfer {} -> {} failed: {}", request.source, request.destination, e);
                            TransferResult::failure(request, e)
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn make_collection(&self, client: &Client, mkcol: Method, url: &str) {
        match self.authorize(client.request(mkcol, url)).send().await {
            Ok(response) if response.status().is_success() => debug!("Created collection {}", url),
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                debug!("Collection {} already exists", url)
            }
            Ok(response) => debug!("MKCOL {} returned {}", url, response.status()),
            Err(e) => warn!("MKCOL {} failed: {}", url, e),
        }
    }

    async fn download(&self, client: &Client, request: &TransferRequest) -> std::result::Result<u64, HttpFailure> {
        let response = self
            .authorize(client.get(&request.source))
            .send()
            .await?
            .error_for_status()?;

        let destination = Path::new(&request.destination);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = staging_path(destination);
        let received = match receive(response, &staging, request.expected_size).await {
            Ok(written) => tokio::fs::rename(&staging, destination)
                .await
                .map(|_| written)
                .map_err(HttpFailure::from),
            Err(e) => Err(e),
        };
        if received.is_err() {
            discard(&staging).await;
        }
        received
    }

    async fn upload(&self, client: &Client, request: &TransferRequest) -> std::result::Result<u64, HttpFailure> {
        let file = tokio::fs::File::open(&request.source).await?;
        let length = file.metadata().await?.len();
        check_size(request.expected_size, length)?;

        let body = Body::wrap_stream(ReaderStream::new(file));
        self.authorize(client.put(&request.destination))
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(length)
    }
}

/// Stream a response body into `staging` and check its length
async fn receive(
    mut response: reqwest::Response,
    staging: &Path,
    expected_size: Option<u64>,
) -> std::result::Result<u64, HttpFailure> {
    let mut file = tokio::fs::File::create(staging).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    check_size(expected_size, written)
}

async fn discard(staging: &Path) {
    if let Err(e) = tokio::fs::remove_file(staging).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Cannot remove partial download {}: {}", staging.display(), e);
        }
    }
}

impl TransferBackend for HttpTransfer {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn blocking_transfer(&self, requests: &[TransferRequest]) -> Result<Vec<TransferResult>> {
        let runtime = super::runtime(BACKEND)?;
        let results = runtime.block_on(self.transfer_all(requests))?;

        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("HTTP transfer: {} of {} files transferred", ok, requests.len());
        Ok(results)
    }
}

fn check_size(expected: Option<u64>, actual: u64) -> std::result::Result<u64, HttpFailure> {
    match expected {
        Some(expected) if expected != actual => Err(HttpFailure::Size { expected, actual }),
        _ => Ok(actual),
    }
}

/// Collection URLs above a file URL, outermost first
fn parent_collections(file_url: &str) -> std::result::Result<Vec<String>, url::ParseError> {
    let url = Url::parse(file_url)?;
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut collections = Vec::new();
    for depth in 1..segments.len() {
        let mut collection = url.clone();
        collection.set_path(&format!("/{}/", segments[..depth].join("/")));
        collection.set_query(None);
        collection.set_fragment(None);
        collections.push(collection.to_string());
    }
    Ok(collections)
}
