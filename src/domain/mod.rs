//! Core domain types and models
//!
//! Defines the run configuration, the series records read from input files,
//! and the outcome/report types written to the output directory.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Current report schema version
pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";

/// Name of the run summary written at the root of the output directory
pub const SUMMARY_FILE_NAME: &str = "registration_report.json";

/// Suffix appended to an input file stem to form its per-file report name
pub const REPORT_SUFFIX: &str = "registration.json";

/// Environment variable ChRIS sets with the id of the upstream plugin instance
pub const PREV_PLUGIN_INSTANCE_ENV: &str = "CHRIS_PREV_PLG_INST_ID";

/// Main configuration for reg-chxr
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // CUBE connection
    #[serde(default = "default_cube_url")]
    pub cube_url: String,

    #[serde(default = "default_cube_user", deserialize_with = "deserialize_text")]
    pub cube_user: String,

    #[serde(
        default = "default_cube_password",
        deserialize_with = "deserialize_text",
        skip_serializing
    )]
    pub cube_password: String,

    /// Upstream plugin instance the dircopy node is attached to.
    #[serde(default, deserialize_with = "deserialize_instance_id")]
    pub plugin_instance_id: Option<String>,

    // Input selection
    #[serde(default = "default_input_glob", alias = "input_json_file")]
    pub input_glob: String,

    // Anonymization and push
    #[serde(default, deserialize_with = "deserialize_text")]
    pub tag_struct: String,

    #[serde(default = "default_orthanc_url")]
    pub orthanc_url: String,

    #[serde(default = "default_orthanc_username", deserialize_with = "deserialize_text")]
    pub orthanc_username: String,

    #[serde(
        default = "default_orthanc_password",
        deserialize_with = "deserialize_text",
        skip_serializing
    )]
    pub orthanc_password: String,

    #[serde(default, deserialize_with = "deserialize_text")]
    pub push_to_remote: String,

    // Registration polling
    #[serde(default = "default_poll_count")]
    pub poll_count: u32,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    // Workflow
    #[serde(default = "default_true")]
    pub schedule_workflow: bool,

    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,

    #[serde(default = "default_dircopy_plugin")]
    pub dircopy_plugin: String,

    #[serde(default = "default_dircopy_version")]
    pub dircopy_version: String,

    // HTTP behaviour
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cube_url: default_cube_url(),
            cube_user: default_cube_user(),
            cube_password: default_cube_password(),
            plugin_instance_id: None,
            input_glob: default_input_glob(),
            tag_struct: String::new(),
            orthanc_url: default_orthanc_url(),
            orthanc_username: default_orthanc_username(),
            orthanc_password: default_orthanc_password(),
            push_to_remote: String::new(),
            poll_count: default_poll_count(),
            poll_interval_secs: default_poll_interval_secs(),
            schedule_workflow: true,
            pipeline_name: default_pipeline_name(),
            dircopy_plugin: default_dircopy_plugin(),
            dircopy_version: default_dircopy_version(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

pub fn default_cube_url() -> String {
    "http://localhost:8000/api/v1/".to_string()
}

pub fn default_cube_user() -> String {
    "chris".to_string()
}

pub fn default_cube_password() -> String {
    "chris1234".to_string()
}

pub fn default_input_glob() -> String {
    "**/*.json".to_string()
}

pub fn default_orthanc_url() -> String {
    "http://0.0.0.0:8042".to_string()
}

pub fn default_orthanc_username() -> String {
    "orthanc".to_string()
}

pub fn default_orthanc_password() -> String {
    "orthanc".to_string()
}

pub fn default_poll_count() -> u32 {
    10
}

pub fn default_poll_interval_secs() -> u64 {
    2
}

fn default_pipeline_name() -> String {
    "DICOM anonymization and Orthanc push 20241217".to_string()
}

fn default_dircopy_plugin() -> String {
    "pl-dsdircopy".to_string()
}

fn default_dircopy_version() -> String {
    "1.0.2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    5
}

/// Parameters sent to the Orthanc push step of the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendParams {
    pub url: String,
    pub username: String,
    pub password: String,
    pub aec: String,
}

impl Config {
    pub fn send_params(&self) -> SendParams {
        SendParams {
            url: self.orthanc_url.clone(),
            username: self.orthanc_username.clone(),
            password: self.orthanc_password.clone(),
            aec: self.push_to_remote.clone(),
        }
    }
}

/// One PACS series as listed in an input JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,

    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,

    #[serde(
        rename = "NumberOfSeriesRelatedInstances",
        deserialize_with = "deserialize_count"
    )]
    pub number_of_instances: u64,

    #[serde(
        rename = "SeriesDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub series_description: Option<String>,

    #[serde(rename = "PatientID", default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

impl SeriesRecord {
    /// Search parameters CUBE understands for this series.
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            series_instance_uid: self.series_instance_uid.clone(),
            study_instance_uid: self.study_instance_uid.clone(),
        }
    }
}

/// PACS instance counts arrive either as JSON numbers or as DICOM-style strings.
fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| {
                serde::de::Error::custom(format!("invalid instance count '{s}': {e}"))
            }),
    }
}

/// A scalar taken as text. Environment values that look numeric or boolean
/// arrive typed, e.g. `REG_CHXR_CUBE_PASSWORD=123456`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Unsigned(n) => n.to_string(),
            Self::Signed(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?.into_text())
}

/// Instance ids are numeric in CUBE but may be configured as strings; blank is unset.
fn deserialize_instance_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(Scalar::into_text)
        .filter(|id| !id.trim().is_empty()))
}

/// The subset of a series record used to query CUBE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,

    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
}

impl SearchParams {
    pub fn as_query(&self) -> [(&'static str, &str); 2] {
        [
            ("SeriesInstanceUID", self.series_instance_uid.as_str()),
            ("StudyInstanceUID", self.study_instance_uid.as_str()),
        ]
    }
}

impl std::fmt::Display for SearchParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SeriesInstanceUID={} StudyInstanceUID={}",
            self.series_instance_uid, self.study_instance_uid
        )
    }
}

/// Pass/fail status for a series, a file, or the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
}

impl CheckStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Self::Passed
        } else {
            Self::Failed
        }
    }

    pub fn is_passed(self) -> bool {
        self == Self::Passed
    }
}

/// Last stage a series reached while being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Registration,
    Locate,
    Dircopy,
    Workflow,
    Done,
}

/// Result of checking one series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesOutcome {
    pub series_instance_uid: String,
    pub study_instance_uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,

    /// Instance count the input file announced
    pub expected_files: u64,

    /// Series count CUBE reported after polling
    pub registered: u64,

    /// Extra registration queries made after the first one
    pub polls: u32,

    pub status: CheckStatus,
    pub stage: Stage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dicom_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dircopy_instance_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflow_instance_ids: Vec<u64>,
}

impl SeriesOutcome {
    pub fn new(record: &SeriesRecord) -> Self {
        Self {
            series_instance_uid: record.series_instance_uid.clone(),
            study_instance_uid: record.study_instance_uid.clone(),
            series_description: record.series_description.clone(),
            patient_id: record.patient_id.clone(),
            expected_files: record.number_of_instances,
            registered: 0,
            polls: 0,
            status: CheckStatus::Failed,
            stage: Stage::Registration,
            message: None,
            dicom_dir: None,
            dircopy_instance_id: None,
            workflow_id: None,
            workflow_instance_ids: Vec::new(),
        }
    }

    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        self.status = CheckStatus::Failed;
        self.stage = stage;
        self.message = Some(message.into());
    }

    pub fn pass(&mut self, stage: Stage) {
        self.status = CheckStatus::Passed;
        self.stage = stage;
        self.message = None;
    }
}

/// Report for a single input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// Input path relative to the input directory
    pub input: String,

    pub status: CheckStatus,

    #[serde(default)]
    pub series: Vec<SeriesOutcome>,

    /// File-level failure (unreadable, malformed, empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    pub fn from_series(input: String, series: Vec<SeriesOutcome>) -> Self {
        let passed = series.iter().all(|s| s.status.is_passed());
        Self {
            input,
            status: CheckStatus::from_passed(passed),
            series,
            error: None,
        }
    }

    pub fn from_error(input: String, error: impl Into<String>) -> Self {
        Self {
            input,
            status: CheckStatus::Failed,
            series: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn series_passed(&self) -> usize {
        self.series.iter().filter(|s| s.status.is_passed()).count()
    }

    pub fn series_failed(&self) -> usize {
        self.series.len() - self.series_passed()
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub files_checked: usize,
    pub files_passed: usize,
    pub files_failed: usize,
    pub series_checked: usize,
    pub series_passed: usize,
    pub series_failed: usize,
}

impl RunStats {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut stats = Self::default();
        for report in reports {
            stats.files_checked += 1;
            if report.status.is_passed() {
                stats.files_passed += 1;
            } else {
                stats.files_failed += 1;
            }
            stats.series_checked += report.series.len();
            stats.series_passed += report.series_passed();
            stats.series_failed += report.series_failed();
        }
        stats
    }

    pub fn status(&self) -> CheckStatus {
        CheckStatus::from_passed(self.files_failed == 0)
    }
}

/// Curated, password-free view of the effective configuration for reports.
pub fn config_summary(config: &Config) -> BTreeMap<&'static str, serde_json::Value> {
    BTreeMap::from([
        ("cube_url", serde_json::json!(config.cube_url)),
        ("cube_user", serde_json::json!(config.cube_user)),
        ("plugin_instance_id", serde_json::json!(config.plugin_instance_id)),
        ("input_glob", serde_json::json!(config.input_glob)),
        ("tag_struct", serde_json::json!(config.tag_struct)),
        ("orthanc_url", serde_json::json!(config.orthanc_url)),
        ("push_to_remote", serde_json::json!(config.push_to_remote)),
        ("poll_count", serde_json::json!(config.poll_count)),
        ("poll_interval_secs", serde_json::json!(config.poll_interval_secs)),
        ("schedule_workflow", serde_json::json!(config.schedule_workflow)),
        ("pipeline_name", serde_json::json!(config.pipeline_name)),
    ])
}
