//! Blocking client for the CUBE REST API
//!
//! Talks Collection+JSON over HTTP basic auth. GET requests are retried on
//! transport errors and 5xx responses with exponential backoff; POSTs create
//! resources and are sent once. The health check is never retried.

pub mod collection;
pub mod pipeline;
#[cfg(test)]
mod stub;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::check::poll::{Sleeper, ThreadSleeper};
use crate::domain::{Config, SearchParams};
use crate::error::{RegChxrError, Result};
use collection::{Collection, Document};
pub use pipeline::{PluginOverrides, WorkflowNode};

pub const COLLECTION_JSON: &str = "application/vnd.collection+json";

/// Operations the registration check needs from CUBE.
pub trait CubeApi {
    /// Reachability and credential check against the API root.
    fn health_check(&self) -> Result<()>;

    /// Number of PACS series registered under these search parameters.
    fn registered_series_count(&self, params: &SearchParams) -> Result<u64>;

    /// CUBE directory holding the DICOM files of a registered series.
    fn series_dicom_dir(&self, params: &SearchParams) -> Result<String>;

    /// Copy `dicom_dir` into a new dircopy plugin instance; returns its id.
    fn run_dircopy(&self, dicom_dir: &str, previous_id: &str) -> Result<u64>;

    /// Schedule the configured pipeline off `previous_instance_id`.
    fn schedule_workflow(
        &self,
        previous_instance_id: u64,
        overrides: &PluginOverrides,
    ) -> Result<ScheduledWorkflow>;
}

/// A workflow created in CUBE and the plugin instances it spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWorkflow {
    pub id: u64,
    pub plugin_instance_ids: Vec<u64>,
}

/// Exponential backoff between attempts: `min(max_wait, max(min_wait, 2^n))` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(2_u64.saturating_pow(attempt.min(32)));
        exp.clamp(self.min_wait, self.max_wait)
    }
}

pub struct CubeClient {
    http: Client,
    base: String,
    username: String,
    password: String,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    pipeline_name: String,
    dircopy_plugin: String,
    dircopy_version: String,
}

impl CubeClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        let mut base = config.cube_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http,
            base,
            username: config.cube_user.clone(),
            password: config.cube_password.clone(),
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                ..RetryPolicy::default()
            },
            sleeper: Box::new(ThreadSleeper),
            pipeline_name: config.pipeline_name.clone(),
            dircopy_plugin: config.dircopy_plugin.clone(),
            dircopy_version: config.dircopy_version.clone(),
        })
    }

    /// Wait between retries with `sleeper` instead of the current thread.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, COLLECTION_JSON)
    }

    fn send(&self, url: &str, builder: RequestBuilder) -> Result<Collection> {
        let response = self.authorized(builder).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegChxrError::Cube {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text()?;
        let doc: Document = serde_json::from_str(&body).map_err(|e| RegChxrError::Response {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(error) = doc.collection.error.as_ref() {
            return Err(RegChxrError::Response {
                url: url.to_string(),
                reason: error.to_string(),
            });
        }
        Ok(doc.collection)
    }

    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let wait = self.retry.delay(attempt);
                    tracing::warn!(
                        "{what} failed (attempt {attempt}/{}): {err}; retrying in {}s",
                        self.retry.attempts,
                        wait.as_secs()
                    );
                    self.sleeper.sleep(wait);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Collection> {
        let url = self.url(path);
        tracing::debug!(%url, ?query, "GET");
        self.with_retry(&format!("GET {url}"), || {
            self.send(&url, self.http.get(&url).query(query))
        })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Collection> {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        self.send(&url, self.http.post(&url).json(body))
    }

    fn plugin_id(&self, name: &str, version: &str) -> Result<u64> {
        let found = self.get(
            "plugins/search/",
            &[("name", name), ("version", version)],
        )?;
        found.first().and_then(|item| item.id()).ok_or_else(|| {
            RegChxrError::NotFound(format!(
                "No plugin found with matching criteria: name={name} version={version}"
            ))
        })
    }

    fn pipeline_id(&self, name: &str) -> Result<u64> {
        let found = self.get("pipelines/search/", &[("name", name)])?;
        found.first().and_then(|item| item.id()).ok_or_else(|| {
            RegChxrError::NotFound(format!("No pipeline found with name: {name}"))
        })
    }

    /// Default parameters of a pipeline grouped into workflow nodes.
    pub fn pipeline_nodes(&self, pipeline_id: u64) -> Result<Vec<WorkflowNode>> {
        let defaults = self.get(
            &format!("pipelines/{pipeline_id}/parameters/"),
            &[("limit", "1000")],
        )?;
        Ok(pipeline::nodes_from_defaults(&defaults.items))
    }
}

impl CubeApi for CubeClient {
    fn health_check(&self) -> Result<()> {
        let url = self.base.clone();
        let failed = |reason: String| RegChxrError::HealthCheck {
            url: url.clone(),
            reason,
        };
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }
        Ok(())
    }

    fn registered_series_count(&self, params: &SearchParams) -> Result<u64> {
        Ok(self.get("pacs/series/search/", &params.as_query())?.total())
    }

    fn series_dicom_dir(&self, params: &SearchParams) -> Result<String> {
        let [series, study] = params.as_query();
        let files = self.get("pacs/files/search/", &[series, study, ("limit", "1")])?;
        let fname = files
            .first()
            .and_then(|item| item.get_str("fname"))
            .ok_or_else(|| {
                RegChxrError::NotFound(format!(
                    "No directory found in CUBE containing files for search: {params}"
                ))
            })?;
        Ok(dicom_dir_of(fname))
    }

    fn run_dircopy(&self, dicom_dir: &str, previous_id: &str) -> Result<u64> {
        if dicom_dir.trim().is_empty() {
            return Err(RegChxrError::NotFound(
                "Empty DICOM directory path provided.".to_string(),
            ));
        }
        let previous: Value = previous_id
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(previous_id.trim()));

        let plugin_id = self.plugin_id(&self.dircopy_plugin, &self.dircopy_version)?;
        let created = self.post(
            &format!("plugins/{plugin_id}/instances/"),
            &json!({ "previous_id": previous, "dir": dicom_dir }),
        )?;
        created.first().and_then(|item| item.id()).ok_or_else(|| {
            RegChxrError::NotFound("Plugin instance could not be scheduled.".to_string())
        })
    }

    fn schedule_workflow(
        &self,
        previous_instance_id: u64,
        overrides: &PluginOverrides,
    ) -> Result<ScheduledWorkflow> {
        let pipeline_id = self.pipeline_id(&self.pipeline_name)?;
        let mut nodes = self.pipeline_nodes(pipeline_id)?;
        pipeline::apply_overrides(&mut nodes, overrides);

        let created = self.post(
            &format!("pipelines/{pipeline_id}/workflows/"),
            &json!({
                "previous_plugin_inst_id": previous_instance_id,
                "nodes_info": serde_json::to_string(&nodes)?,
            }),
        )?;
        let id = created.first().and_then(|item| item.id()).ok_or_else(|| {
            RegChxrError::NotFound(format!(
                "Workflow for pipeline {pipeline_id} could not be created."
            ))
        })?;

        let instances = self.get(
            &format!("workflows/{id}/plugininstances/"),
            &[("limit", "1000")],
        )?;
        Ok(ScheduledWorkflow {
            id,
            plugin_instance_ids: instances.ids(),
        })
    }
}

/// Parent directory of a CUBE file path, `/`-separated.
pub fn dicom_dir_of(fname: &str) -> String {
    Path::new(fname)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| fname.to_string())
}
