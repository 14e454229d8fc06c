use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ScanOutcome {
    Converted { fetched: bool },
    ConvertCached { fetched: bool },
    Planned,
    Skipped(SkipReason),
    FailedFetch(String),
    FailedConvert(String),
}

impl ScanOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::Converted { .. } => "converted",
            ScanOutcome::ConvertCached { .. } => "convert_cached",
            ScanOutcome::Planned => "planned",
            ScanOutcome::Skipped(_) => "skipped",
            ScanOutcome::FailedFetch(_) => "failed_fetch",
            ScanOutcome::FailedConvert(_) => "failed_convert",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ScanOutcome::FailedFetch(_) | ScanOutcome::FailedConvert(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    ReservedScanId,
    NotInTranslationTable,
    NotExpressible(String),
    NotFound(String),
    DuplicateDestination(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ReservedScanId => write!(f, "localizer or setup scan"),
            SkipReason::NotInTranslationTable => write!(f, "absent from scan translation table"),
            SkipReason::NotExpressible(detail) => {
                write!(f, "not expressible in target scheme ({detail})")
            }
            SkipReason::NotFound(detail) => write!(f, "not found on archive ({detail})"),
            SkipReason::DuplicateDestination(other) => {
                write!(f, "destination already used by {other}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub subject: String,
    pub session: String,
    pub scan_id: String,
    pub scan_label: String,
    pub outcome: ScanOutcome,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ResolutionMismatch,
    MissingSubject,
    Listing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportWarning {
    pub kind: WarningKind,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub records: Vec<ScanRecord>,
    pub warnings: Vec<ReportWarning>,
}

impl RunReport {
    pub fn record(&mut self, record: ScanRecord) {
        self.records.push(record);
    }

    pub fn warn(&mut self, kind: WarningKind, subject: Option<&str>, message: impl Into<String>) {
        self.warnings.push(ReportWarning {
            kind,
            subject: subject.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.outcome.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records
            .iter()
            .filter(|record| record.outcome.kind() == kind)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScanRecord> {
        self.records
            .iter()
            .filter(|record| record.outcome.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}
