//! Platform API client.
//!
//! REST implementation of [`RunStore`] against the platform API server:
//! - In-cluster credentials (service-account token + CA bundle) when the
//!   well-known files are present, plain HTTP against a local proxy
//!   otherwise
//! - Merge patches for label/pause mutations, background-propagation
//!   deletes
//! - The line-delimited watch stream for run events
//!
//! Every call carries the client-wide timeout; on timeout the action is
//! simply retried on the next trigger, never escalated.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use gantry_model::{GlobalLimit, PipelineRun, LIMIT_NAME};

use crate::config::Config;
use crate::store::{RunEvent, RunStore, StoreError};

/// Collection paths, derived from the objects' API groups.
const RUNS_PATH: &str = "/apis/tekton.dev/v1/pipelineruns";
const NAMESPACED_RUNS_PATH: &str = "/apis/tekton.dev/v1/namespaces";
const NAMESPACES_PATH: &str = "/api/v1/namespaces";
const LIMITS_PATH: &str = "/apis/gantry.dev/v1/globallimits";

/// Platform API client.
pub struct ApiStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiStore {
    /// Build a client from configuration, loading in-cluster credentials
    /// when present.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));

        if Path::new(&config.ca_path).exists() {
            let pem = std::fs::read(&config.ca_path)
                .with_context(|| format!("reading CA bundle {}", config.ca_path))?;
            builder = builder.add_root_certificate(
                reqwest::Certificate::from_pem(&pem).context("parsing CA bundle")?,
            );
        }

        let token = if Path::new(&config.token_path).exists() {
            let raw = std::fs::read_to_string(&config.token_path)
                .with_context(|| format!("reading token {}", config.token_path))?;
            Some(raw.trim().to_string())
        } else {
            None
        };

        Ok(Self {
            client: builder.build().context("building HTTP client")?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// One-shot connectivity check; failure here is the only error the
    /// daemon treats as fatal.
    pub async fn probe(&self) -> Result<(), StoreError> {
        let url = format!("{}/version", self.base_url);
        let response = self
            .request(reqwest::Method::GET, &url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "API server probe failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn run_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}{}/{}/pipelineruns/{}",
            self.base_url, NAMESPACED_RUNS_PATH, namespace, name
        )
    }

    /// Send and decode the body as `T`, mapping error statuses.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let response = check_status(response, what).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn merge_patch(
        &self,
        namespace: &str,
        name: &str,
        body: serde_json::Value,
        what: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::PATCH, &self.run_url(namespace, name))
            .header("Content-Type", "application/merge-patch+json")
            .json(&body)
            .send()
            .await?;
        check_status(response, what).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for ApiStore {
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        let url = format!("{}{}", self.base_url, NAMESPACES_PATH);
        let list: ObjectList<NamedObject> = self.fetch(&url, "list namespaces").await?;
        Ok(list.items.into_iter().map(|ns| ns.metadata.name).collect())
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, StoreError> {
        let url = format!("{}{}", self.base_url, RUNS_PATH);
        let list: ObjectList<PipelineRun> = self.fetch(&url, "list runs").await?;
        debug!(count = list.items.len(), "Listed runs");
        Ok(list.items)
    }

    async fn get_run(&self, namespace: &str, name: &str) -> Result<PipelineRun, StoreError> {
        self.fetch(&self.run_url(namespace, name), "get run").await
    }

    async fn patch_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let body = serde_json::json!({"metadata": {"labels": labels}});
        self.merge_patch(namespace, name, body, "patch labels").await
    }

    async fn patch_pause(
        &self,
        namespace: &str,
        name: &str,
        pause: Option<&str>,
    ) -> Result<(), StoreError> {
        // A null value removes the key under merge-patch semantics.
        let value = match pause {
            Some(p) => serde_json::Value::String(p.to_string()),
            None => serde_json::Value::Null,
        };
        let body = serde_json::json!({"spec": {"status": value}});
        self.merge_patch(namespace, name, body, "patch pause").await
    }

    async fn delete_run(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let body = serde_json::json!({"propagationPolicy": "Background"});
        let response = self
            .request(reqwest::Method::DELETE, &self.run_url(namespace, name))
            .json(&body)
            .send()
            .await?;
        check_status(response, "delete run").await?;
        Ok(())
    }

    async fn create_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let url = format!(
            "{}{}/{}/pipelineruns",
            self.base_url, NAMESPACED_RUNS_PATH, run.metadata.namespace
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(run)
            .send()
            .await?;
        match check_status(response, "create run").await {
            // The API server reports an existing object as a conflict.
            Err(StoreError::Conflict(_)) => Err(StoreError::AlreadyExists(run.key())),
            other => other.map(|_| ()),
        }
    }

    async fn get_limit(&self) -> Result<GlobalLimit, StoreError> {
        let url = format!("{}{}/{}", self.base_url, LIMITS_PATH, LIMIT_NAME);
        self.fetch(&url, "get limit").await
    }

    async fn watch_runs(&self) -> Result<BoxStream<'static, RunEvent>, StoreError> {
        let url = format!("{}{}?watch=true", self.base_url, RUNS_PATH);
        let response = self
            .request(reqwest::Method::GET, &url)
            // The watch is long-lived; the client-wide timeout must not
            // cut it off.
            .timeout(Duration::from_secs(60 * 60))
            .send()
            .await?;
        let response = check_status(response, "watch runs").await?;

        let stream = futures_util::stream::unfold(
            (Box::pin(response.bytes_stream()), Vec::<u8>::new()),
            |(mut body, mut buf)| async move {
                loop {
                    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        if let Some(event) = parse_watch_line(&line) {
                            return Some((event, (body, buf)));
                        }
                        continue;
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            warn!(error = %e, "Watch stream transport error");
                            return None;
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}

/// Decode one line-delimited watch frame. Bookmarks, status frames, and
/// anything undecodable are skipped.
fn parse_watch_line(line: &[u8]) -> Option<RunEvent> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    if line.is_empty() {
        return None;
    }

    let frame: WatchFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Skipping undecodable watch frame");
            return None;
        }
    };

    let run: PipelineRun = match serde_json::from_value(frame.object) {
        Ok(run) => run,
        Err(e) => {
            debug!(error = %e, kind = %frame.kind, "Skipping non-run watch object");
            return None;
        }
    };

    match frame.kind.as_str() {
        "ADDED" => Some(RunEvent::Created(run)),
        "MODIFIED" => Some(RunEvent::Updated(run)),
        "DELETED" => Some(RunEvent::Deleted(run)),
        _ => None,
    }
}

/// Map an unsuccessful response to the store error taxonomy.
async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(what.to_string()),
        StatusCode::CONFLICT => StoreError::Conflict(what.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::Rejected(format!("{what}: {body}"))
        }
        _ => StoreError::Transport(format!("{what}: {status} {body}")),
    })
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    metadata: NamedMeta,
}

#[derive(Debug, Deserialize)]
struct NamedMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WatchFrame {
    #[serde(rename = "type")]
    kind: String,
    object: serde_json::Value,
}
