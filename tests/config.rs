use std::time::Duration;

use assert_matches::assert_matches;

use kira_bids::config::{Config, ConfigLoader, SessionLabels, SubjectEntry, SubjectFilter};
use kira_bids::error::KiraError;
use kira_bids::session::SessionMode;

#[test]
fn parse_full_batch_specification() {
    let resolved = ConfigLoader::resolve_str(
        r#"{
            "destination": "/data/bids",
            "project": "xnatDownload",
            "subjects": ["21", "sub-104"],
            "session_labels": ["pre", "post"],
            "scan_labels": ["DTI"],
            "scan_dict": {"DTI": "dwi", "SAG FSPGR BRAVO": "anat-T1w"},
            "subject_dict": {"21": "mon21"},
            "overwrite": true,
            "max_attempts": 5,
            "retry_delay_ms": 10,
            "reserved_scan_ids": ["1"],
            "session_mode": "chronological"
        }"#,
    )
    .unwrap();

    assert_eq!(resolved.destination.as_str(), "/data/bids");
    assert_eq!(
        resolved.subjects,
        Some(vec!["21".to_string(), "sub-104".to_string()])
    );
    assert_eq!(resolved.zero_pad, Some(3));
    assert_eq!(
        resolved.session_labels,
        Some(vec!["pre".to_string(), "post".to_string()])
    );
    assert_eq!(
        resolved.scan_translation.as_ref().unwrap().lookup("DTI"),
        Some("dwi")
    );
    assert_eq!(
        resolved.subject_translation.as_ref().unwrap().lookup("21"),
        Some("mon21")
    );
    assert!(resolved.overwrite);
    assert_eq!(resolved.retry.max_attempts, 5);
    assert_eq!(resolved.retry.delay, Duration::from_millis(10));
    assert_eq!(resolved.reserved_scan_ids, vec!["1".to_string()]);
    assert_eq!(resolved.session_mode, SessionMode::Chronological);
}

#[test]
fn keywords_mean_everything_and_nothing() {
    let resolved = ConfigLoader::resolve_str(
        r#"{"destination": "/d", "project": "p", "subjects": "all", "session_labels": "None"}"#,
    )
    .unwrap();
    assert!(resolved.subjects.is_none());
    assert!(resolved.session_labels.is_none());
    assert_eq!(resolved.zero_pad, None);
}

#[test]
fn numeric_subjects_are_accepted() {
    let config = Config {
        destination: Some("/d".to_string()),
        project: Some("p".to_string()),
        subjects: Some(SubjectFilter::List(vec![
            SubjectEntry::Number(7),
            SubjectEntry::Text(" 1042 ".to_string()),
        ])),
        session_labels: Some(SessionLabels::List(vec!["base".to_string()])),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(
        resolved.subjects,
        Some(vec!["7".to_string(), "1042".to_string()])
    );
    assert_eq!(resolved.zero_pad, Some(4));
}

#[test]
fn explicit_zero_pad_wins() {
    let resolved = ConfigLoader::resolve_str(
        r#"{"destination": "/d", "project": "p", "subjects": ["1"], "zero_pad": 2}"#,
    )
    .unwrap();
    assert_eq!(resolved.zero_pad, Some(2));
}

#[test]
fn missing_destination_is_reported() {
    let err = ConfigLoader::resolve_str(r#"{"project": "p", "destination": "  "}"#).unwrap_err();
    assert!(err.is_config());
    assert_matches!(err, KiraError::MissingConfigField(fields) if fields == vec!["destination"]);
}

#[test]
fn unknown_session_mode_is_rejected() {
    let err = ConfigLoader::resolve_str(
        r#"{"destination": "/d", "project": "p", "session_mode": "alphabetical"}"#,
    )
    .unwrap_err();
    assert_matches!(err, KiraError::InvalidConfigValue { field, .. } if field == "session_mode");
}

#[test]
fn bad_subject_keyword_is_rejected() {
    let err = ConfigLoader::resolve_str(r#"{"destination": "/d", "project": "p", "subjects": "some"}"#)
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidConfigValue { field, .. } if field == "subjects");
}

#[test]
fn non_object_is_a_parse_error() {
    let err = ConfigLoader::resolve_str("[1, 2]").unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn unknown_keys_do_not_fail() {
    let resolved =
        ConfigLoader::resolve_str(r#"{"destination": "/d", "project": "p", "dcm_dir": "x"}"#)
            .unwrap();
    assert_eq!(resolved.project, "p");
}

#[test]
fn missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str().unwrap()).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}
