use chrono::NaiveDate;

use kira_bids::domain::{RawSession, SubjectRef};
use kira_bids::session::{SessionMode, resolve};

fn subject() -> SubjectRef {
    SubjectRef::resolve("21", true, None, None).unwrap()
}

fn raw(ids: &[&str]) -> Vec<RawSession> {
    ids.iter().map(|id| RawSession::new(*id)).collect()
}

fn labels(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn earliest_session_gets_first_label() {
    let sessions = raw(&["20180504", "20180609_2", "20180202"]);
    let labels = labels(&["pre", "mid", "post"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);

    assert_eq!(resolution.label_of("20180202"), Some("pre"));
    assert_eq!(resolution.label_of("20180504"), Some("mid"));
    assert_eq!(resolution.label_of("20180609_2"), Some("post"));
    assert!(resolution.unmapped.is_empty());
    assert!(resolution.warnings.is_empty());
}

#[test]
fn resolution_is_reproducible() {
    let labels = labels(&["pre", "mid", "post"]);
    let first = resolve(
        &subject(),
        &raw(&["20180504", "20180609_2", "20180202"]),
        Some(labels.as_slice()),
        SessionMode::Auto,
    );
    let second = resolve(
        &subject(),
        &raw(&["20180202", "20180504", "20180609_2"]),
        Some(labels.as_slice()),
        SessionMode::Auto,
    );
    assert_eq!(first.sessions, second.sessions);
}

#[test]
fn fewer_sessions_than_labels_degrades() {
    let sessions = raw(&["20180504", "20180202"]);
    let labels = labels(&["pre", "mid", "post"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);

    assert_eq!(resolution.sessions.len(), 2);
    assert_eq!(resolution.label_of("20180202"), Some("pre"));
    assert_eq!(resolution.label_of("20180504"), Some("mid"));
    assert_eq!(resolution.warnings.len(), 1);
    assert!(resolution.warnings[0].contains("more session labels"));
}

#[test]
fn extra_sessions_are_left_unmapped() {
    let sessions = raw(&["20180101", "20180303", "20180202"]);
    let labels = labels(&["pre", "post"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);

    assert_eq!(resolution.label_of("20180101"), Some("pre"));
    assert_eq!(resolution.label_of("20180202"), Some("post"));
    assert!(resolution.lookup("20180303").is_none());
    assert_eq!(resolution.unmapped.len(), 1);
    assert_eq!(resolution.unmapped[0].raw_identifier, "20180303");
    assert_eq!(resolution.warnings.len(), 1);
}

#[test]
fn upload_timestamp_overrides_identifier() {
    let late = NaiveDate::from_ymd_opt(2019, 1, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let early = NaiveDate::from_ymd_opt(2017, 1, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let sessions = vec![
        RawSession::new("scan_a").with_timestamp(late),
        RawSession::new("scan_b").with_timestamp(early),
    ];
    let labels = labels(&["pre", "post"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);
    assert_eq!(resolution.label_of("scan_b"), Some("pre"));
    assert_eq!(resolution.label_of("scan_a"), Some("post"));
}

#[test]
fn unparseable_identifier_is_unmapped() {
    let sessions = raw(&["baseline", "20180101"]);
    let labels = labels(&["pre"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);
    assert_eq!(resolution.label_of("20180101"), Some("pre"));
    assert_eq!(resolution.unmapped.len(), 1);
    assert_eq!(resolution.unmapped[0].raw_identifier, "baseline");
}

#[test]
fn no_labels_keeps_earliest_session_unlabeled() {
    let sessions = raw(&["20180303", "20180101"]);
    let resolution = resolve(&subject(), &sessions, None, SessionMode::Auto);
    assert_eq!(resolution.sessions.len(), 1);
    assert_eq!(resolution.sessions[0].raw.raw_identifier, "20180101");
    assert_eq!(resolution.sessions[0].canonical_label, None);
    assert_eq!(resolution.unmapped.len(), 1);
    assert_eq!(resolution.warnings.len(), 1);
}

#[test]
fn direct_mode_strips_prefix() {
    let sessions = raw(&["sub-001_ses-01", "sub-001_ses-02"]);
    let resolution = resolve(&subject(), &sessions, None, SessionMode::Auto);
    assert_eq!(resolution.label_of("sub-001_ses-01"), Some("01"));
    assert_eq!(resolution.label_of("sub-001_ses-02"), Some("02"));
}

#[test]
fn direct_mode_filters_by_labels() {
    let sessions = raw(&["sub-01_ses-pre", "sub-01_ses-post", "sub-01_ses-extra"]);
    let labels = labels(&["pre", "post"]);
    let resolution = resolve(&subject(), &sessions, Some(labels.as_slice()), SessionMode::Auto);
    assert_eq!(resolution.sessions.len(), 2);
    assert_eq!(resolution.unmapped.len(), 1);
    assert!(resolution.warnings.is_empty());
}

#[test]
fn forced_chronological_mode_ignores_prefix() {
    let sessions = vec![
        RawSession::new("sub-01_ses-b").with_timestamp(
            NaiveDate::from_ymd_opt(2018, 2, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        ),
        RawSession::new("sub-01_ses-a").with_timestamp(
            NaiveDate::from_ymd_opt(2018, 3, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        ),
    ];
    let labels = labels(&["first", "second"]);
    let resolution = resolve(
        &subject(),
        &sessions,
        Some(labels.as_slice()),
        SessionMode::Chronological,
    );
    assert_eq!(resolution.label_of("sub-01_ses-b"), Some("first"));
    assert_eq!(resolution.label_of("sub-01_ses-a"), Some("second"));
}
