use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectRef {
    pub raw_label: String,
    pub canonical_label: String,
    pub exists: bool,
}

impl SubjectRef {
    pub fn resolve(
        raw_label: &str,
        exists: bool,
        translation: Option<&TranslationTable>,
        zero_pad: Option<usize>,
    ) -> Result<Self, KiraError> {
        let base = match translation.and_then(|table| table.lookup(raw_label)) {
            Some(translated) => translated.to_string(),
            None => {
                let stripped = raw_label.trim().trim_start_matches("sub-");
                match zero_pad {
                    Some(width) if is_numeric(stripped) => format!("{stripped:0>width$}"),
                    _ => stripped.to_string(),
                }
            }
        };
        let canonical_label = sanitize_label(&base);
        if canonical_label.is_empty() {
            return Err(KiraError::InvalidSubjectLabel(raw_label.to_string()));
        }
        Ok(Self {
            raw_label: raw_label.to_string(),
            canonical_label,
            exists,
        })
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.canonical_label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSession {
    pub archive_id: String,
    pub raw_identifier: String,
    pub upload_timestamp: Option<NaiveDateTime>,
}

impl RawSession {
    pub fn new(raw_identifier: impl Into<String>) -> Self {
        let raw_identifier = raw_identifier.into();
        Self {
            archive_id: raw_identifier.clone(),
            raw_identifier,
            upload_timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.upload_timestamp = Some(timestamp);
        self
    }
}

// No canonical label: the `ses-` segment is omitted from the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRef {
    pub raw: RawSession,
    pub canonical_label: Option<String>,
}

impl SessionRef {
    pub fn raw_identifier(&self) -> &str {
        &self.raw.raw_identifier
    }

    pub fn archive_id(&self) -> &str {
        &self.raw.archive_id
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.canonical_label {
            Some(label) => write!(f, "ses-{label} ({})", self.raw.raw_identifier),
            None => write!(f, "{}", self.raw.raw_identifier),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawScan {
    pub numeric_id: String,
    pub raw_label: String,
}

impl RawScan {
    pub fn new(numeric_id: impl Into<String>, raw_label: impl Into<String>) -> Self {
        Self {
            numeric_id: numeric_id.into(),
            raw_label: raw_label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRef {
    pub numeric_id: String,
    pub raw_type: String,
    pub source_session: SessionRef,
}

impl ScanRef {
    pub fn new(raw: RawScan, session: &SessionRef) -> Self {
        Self {
            numeric_id: raw.numeric_id,
            raw_type: raw.raw_label,
            source_session: session.clone(),
        }
    }

    pub fn staging_dir_name(&self) -> String {
        let sanitized: String = self
            .raw_type
            .chars()
            .map(|ch| match ch {
                '-' | ':' | ' ' | '/' | '\\' => '_',
                other => other,
            })
            .collect();
        format!("{}-{}", self.numeric_id, sanitized)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationTable(BTreeMap<String, String>);

impl TranslationTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn lookup(&self, raw: &str) -> Option<&str> {
        self.0.get(raw).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for TranslationTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn sanitize_label(value: &str) -> String {
    value.chars().filter(|ch| ch.is_ascii_alphanumeric()).collect()
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}
