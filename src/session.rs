use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;

use crate::domain::{RawSession, SessionRef, SubjectRef, sanitize_label};

static DIRECT_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^sub-[a-zA-Z0-9]+_ses-").expect("session prefix is a valid regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Auto,
    Direct,
    Chronological,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionResolution {
    pub sessions: Vec<SessionRef>,
    pub unmapped: Vec<RawSession>,
    pub warnings: Vec<String>,
}

impl SessionResolution {
    pub fn lookup(&self, raw_identifier: &str) -> Option<&SessionRef> {
        self.sessions
            .iter()
            .find(|session| session.raw.raw_identifier == raw_identifier)
    }

    pub fn label_of(&self, raw_identifier: &str) -> Option<&str> {
        self.lookup(raw_identifier)
            .and_then(|session| session.canonical_label.as_deref())
    }
}

pub fn detect_mode(raw_sessions: &[RawSession]) -> SessionMode {
    let all_direct = !raw_sessions.is_empty()
        && raw_sessions
            .iter()
            .all(|session| DIRECT_PREFIX_RE.is_match(&session.raw_identifier));
    if all_direct {
        SessionMode::Direct
    } else {
        SessionMode::Chronological
    }
}

// Never fails: count mismatches and unparseable identifiers become warnings.
pub fn resolve(
    subject: &SubjectRef,
    raw_sessions: &[RawSession],
    user_labels: Option<&[String]>,
    mode: SessionMode,
) -> SessionResolution {
    let mode = match mode {
        SessionMode::Auto => detect_mode(raw_sessions),
        other => other,
    };
    let resolution = match mode {
        SessionMode::Direct => resolve_direct(raw_sessions, user_labels),
        SessionMode::Chronological | SessionMode::Auto => {
            resolve_chronological(raw_sessions, user_labels)
        }
    };
    for warning in &resolution.warnings {
        tracing::warn!(subject = %subject, "{warning}");
    }
    resolution
}

fn resolve_direct(raw_sessions: &[RawSession], user_labels: Option<&[String]>) -> SessionResolution {
    let mut resolution = SessionResolution::default();
    let mut seen = BTreeSet::new();

    for raw in raw_sessions {
        let extracted = DIRECT_PREFIX_RE.replace(&raw.raw_identifier, "");
        let label = sanitize_label(&extracted);
        let wanted = user_labels
            .map(|labels| labels.iter().any(|wanted| *wanted == label))
            .unwrap_or(true);
        if !wanted {
            resolution.unmapped.push(raw.clone());
            continue;
        }
        if label.is_empty() || !seen.insert(label.clone()) {
            resolution.warnings.push(format!(
                "session {} does not yield a unique label; skipping",
                raw.raw_identifier
            ));
            resolution.unmapped.push(raw.clone());
            continue;
        }
        resolution.sessions.push(SessionRef {
            raw: raw.clone(),
            canonical_label: Some(label),
        });
    }

    if let Some(labels) = user_labels {
        let missing: Vec<&str> = labels
            .iter()
            .filter(|label| !seen.contains(label.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            resolution.warnings.push(format!(
                "no archive session for label(s): {}",
                missing.join(", ")
            ));
        }
    }

    resolution
}

fn resolve_chronological(
    raw_sessions: &[RawSession],
    user_labels: Option<&[String]>,
) -> SessionResolution {
    let mut resolution = SessionResolution::default();

    let mut dated = Vec::with_capacity(raw_sessions.len());
    for raw in raw_sessions {
        match raw
            .upload_timestamp
            .or_else(|| parse_session_timestamp(&raw.raw_identifier))
        {
            Some(timestamp) => dated.push((timestamp, raw)),
            None => {
                resolution.warnings.push(format!(
                    "session {} has no upload time and is not a date; skipping",
                    raw.raw_identifier
                ));
                resolution.unmapped.push(raw.clone());
            }
        }
    }
    dated.sort_by(|(left_time, left), (right_time, right)| {
        left_time
            .cmp(right_time)
            .then_with(|| left.raw_identifier.cmp(&right.raw_identifier))
    });

    let Some(labels) = user_labels else {
        let mut sorted = dated.into_iter();
        if let Some((_, earliest)) = sorted.next() {
            resolution.sessions.push(SessionRef {
                raw: earliest.clone(),
                canonical_label: None,
            });
        }
        let rest: Vec<RawSession> = sorted.map(|(_, raw)| raw.clone()).collect();
        if !rest.is_empty() {
            resolution.warnings.push(format!(
                "{} later session(s) ignored because no session labels are configured",
                rest.len()
            ));
            resolution.unmapped.extend(rest);
        }
        return resolution;
    };

    if labels.len() > dated.len() {
        resolution.warnings.push(format!(
            "there are more session labels ({}) than archive sessions ({}); using the first {}",
            labels.len(),
            dated.len(),
            dated.len()
        ));
    } else if labels.len() < dated.len() {
        resolution.warnings.push(format!(
            "there are more archive sessions ({}) than session labels ({}); later sessions are skipped",
            dated.len(),
            labels.len()
        ));
    }

    let mut seen = BTreeSet::new();
    let mut sorted = dated.into_iter();
    for label in labels {
        let Some((_, raw)) = sorted.next() else {
            break;
        };
        let canonical = sanitize_label(label);
        if canonical.is_empty() || !seen.insert(canonical.clone()) {
            resolution.warnings.push(format!(
                "session label `{label}` is empty or repeated; session {} left unmapped",
                raw.raw_identifier
            ));
            resolution.unmapped.push(raw.clone());
            continue;
        }
        resolution.sessions.push(SessionRef {
            raw: raw.clone(),
            canonical_label: Some(canonical),
        });
    }
    resolution.unmapped.extend(sorted.map(|(_, raw)| raw.clone()));

    resolution
}

pub fn parse_session_timestamp(identifier: &str) -> Option<NaiveDateTime> {
    let identifier = identifier.trim();
    if let Ok(date) = NaiveDate::parse_from_str(identifier, "%Y%m%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    let (date, hour) = identifier.split_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let hour: u32 = hour.parse().ok()?;
    date.and_hms_opt(hour, 0, 0)
}

pub fn parse_upload_time(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = date.trim();
    if let Some(time) = time.map(str::trim).filter(|time| !time.is_empty()) {
        let combined = format!("{date} {time}");
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %H:%M:%S") {
            return Some(parsed);
        }
    }
    NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .ok()
                .and_then(|day| day.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_hour_suffixed_dates() {
        let plain = parse_session_timestamp("20180504").unwrap();
        let suffixed = parse_session_timestamp("20180504_2").unwrap();
        assert!(suffixed > plain);
        assert!(parse_session_timestamp("baseline").is_none());
    }

    #[test]
    fn parses_archive_upload_time() {
        let parsed = parse_upload_time("2018-05-04", Some("10:11:12")).unwrap();
        assert_eq!(parsed.to_string(), "2018-05-04 10:11:12");
        let insert = parse_upload_time("2018-05-04 10:11:12.0", None).unwrap();
        assert_eq!(insert, parsed);
    }

    #[test]
    fn detects_direct_mode() {
        let sessions = vec![RawSession::new("sub-01_ses-pre"), RawSession::new("sub-01_ses-post")];
        assert_eq!(detect_mode(&sessions), SessionMode::Direct);
        let mixed = vec![RawSession::new("sub-01_ses-pre"), RawSession::new("20180101")];
        assert_eq!(detect_mode(&mixed), SessionMode::Chronological);
    }
}
