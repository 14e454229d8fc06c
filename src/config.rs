use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::TranslationTable;
use crate::error::KiraError;
use crate::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, RetryPolicy};
use crate::session::SessionMode;

pub const MANDATORY_KEYS: [&str; 2] = ["destination", "project"];
pub const OPTIONAL_KEYS: [&str; 11] = [
    "subjects",
    "session_labels",
    "scan_labels",
    "scan_dict",
    "subject_dict",
    "zero_pad",
    "overwrite",
    "max_attempts",
    "retry_delay_ms",
    "reserved_scan_ids",
    "session_mode",
];

pub fn default_reserved_scan_ids() -> Vec<String> {
    vec!["1".to_string(), "2".to_string()]
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub subjects: Option<SubjectFilter>,
    #[serde(default)]
    pub session_labels: Option<SessionLabels>,
    #[serde(default)]
    pub scan_labels: Option<Vec<String>>,
    #[serde(default)]
    pub scan_dict: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub subject_dict: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub zero_pad: Option<usize>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub reserved_scan_ids: Option<Vec<String>>,
    #[serde(default)]
    pub session_mode: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SubjectFilter {
    List(Vec<SubjectEntry>),
    Keyword(String),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SubjectEntry {
    Text(String),
    Number(u64),
}

impl SubjectEntry {
    fn into_label(self) -> String {
        match self {
            SubjectEntry::Text(value) => value.trim().to_string(),
            SubjectEntry::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SessionLabels {
    List(Vec<String>),
    Keyword(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub destination: Utf8PathBuf,
    pub project: String,
    pub subjects: Option<Vec<String>>,
    pub session_labels: Option<Vec<String>>,
    pub scan_labels: Option<Vec<String>>,
    pub scan_translation: Option<TranslationTable>,
    pub subject_translation: Option<TranslationTable>,
    pub zero_pad: Option<usize>,
    pub overwrite: bool,
    pub retry: RetryPolicy,
    pub reserved_scan_ids: Vec<String>,
    pub session_mode: SessionMode,
}

impl ResolvedConfig {
    pub fn new(destination: Utf8PathBuf, project: impl Into<String>) -> Self {
        Self {
            destination,
            project: project.into(),
            subjects: None,
            session_labels: None,
            scan_labels: None,
            scan_translation: None,
            subject_translation: None,
            zero_pad: None,
            overwrite: false,
            retry: RetryPolicy::default(),
            reserved_scan_ids: default_reserved_scan_ids(),
            session_mode: SessionMode::Auto,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &str) -> Result<ResolvedConfig, KiraError> {
        let config_path = PathBuf::from(path);
        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        Self::resolve_str(&content)
    }

    pub fn resolve_str(content: &str) -> Result<ResolvedConfig, KiraError> {
        let raw: Value =
            serde_json::from_str(content).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        let Value::Object(map) = &raw else {
            return Err(KiraError::ConfigParse(
                "batch specification must be a JSON object".to_string(),
            ));
        };

        let unknown = unknown_keys(map.keys().map(String::as_str));
        if !unknown.is_empty() {
            tracing::warn!("batch specification key(s) not supported: {}", unknown.join(", "));
        }

        let config: Config =
            serde_json::from_value(raw).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let destination = config.destination.filter(|value| !value.trim().is_empty());
        let project = config.project.filter(|value| !value.trim().is_empty());
        let (destination, project) = match (destination, project) {
            (Some(destination), Some(project)) => (destination, project),
            (destination, project) => {
                let mut missing = Vec::new();
                if destination.is_none() {
                    missing.push("destination".to_string());
                }
                if project.is_none() {
                    missing.push("project".to_string());
                }
                return Err(KiraError::MissingConfigField(missing));
            }
        };

        let subjects = match config.subjects {
            None => None,
            Some(SubjectFilter::Keyword(value)) if value.eq_ignore_ascii_case("all") => None,
            Some(SubjectFilter::Keyword(value)) => {
                return Err(KiraError::InvalidConfigValue {
                    field: "subjects".to_string(),
                    message: format!("expected a list or \"all\", got \"{value}\""),
                });
            }
            Some(SubjectFilter::List(entries)) => Some(
                entries
                    .into_iter()
                    .map(SubjectEntry::into_label)
                    .collect::<Vec<_>>(),
            ),
        };

        let session_labels = match config.session_labels {
            None => None,
            Some(SessionLabels::Keyword(value)) if value.eq_ignore_ascii_case("none") => None,
            Some(SessionLabels::Keyword(value)) => {
                return Err(KiraError::InvalidConfigValue {
                    field: "session_labels".to_string(),
                    message: format!("expected a list or \"None\", got \"{value}\""),
                });
            }
            Some(SessionLabels::List(labels)) => Some(labels),
        };

        let zero_pad = config
            .zero_pad
            .or_else(|| subjects.as_deref().and_then(auto_zero_pad));

        let session_mode = match config.session_mode.as_deref() {
            None | Some("auto") => SessionMode::Auto,
            Some("direct") | Some("bids") => SessionMode::Direct,
            Some("chronological") => SessionMode::Chronological,
            Some(other) => {
                return Err(KiraError::InvalidConfigValue {
                    field: "session_mode".to_string(),
                    message: format!("unknown mode \"{other}\""),
                });
            }
        };

        Ok(ResolvedConfig {
            destination: Utf8PathBuf::from(destination),
            project,
            subjects,
            session_labels,
            scan_labels: config.scan_labels,
            scan_translation: config.scan_dict.map(TranslationTable::new),
            subject_translation: config.subject_dict.map(TranslationTable::new),
            zero_pad,
            overwrite: config.overwrite.unwrap_or(false),
            retry: RetryPolicy::new(
                config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                Duration::from_millis(config.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            ),
            reserved_scan_ids: config
                .reserved_scan_ids
                .unwrap_or_else(default_reserved_scan_ids),
            session_mode,
        })
    }
}

pub fn auto_zero_pad(subjects: &[String]) -> Option<usize> {
    subjects
        .iter()
        .map(|subject| subject.trim_start_matches("sub-").len())
        .max()
}

fn unknown_keys<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut unknown: Vec<String> = keys
        .filter(|key| !MANDATORY_KEYS.contains(key) && !OPTIONAL_KEYS.contains(key))
        .map(str::to_string)
        .collect();
    unknown.sort();
    unknown
}
