use assert_matches::assert_matches;

use kira_bids::domain::{SubjectRef, TranslationTable, sanitize_label};
use kira_bids::error::KiraError;

#[test]
fn translation_table_from_json() {
    let table: TranslationTable =
        serde_json::from_str(r#"{"DTI": "dwi", "Resting State": "func-bold_task-rest"}"#).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.lookup("Resting State"), Some("func-bold_task-rest"));
    assert_eq!(table.lookup("resting state"), None);
}

#[test]
fn subject_labels_are_sanitized() {
    assert_eq!(sanitize_label("mon_21-b"), "mon21b");
    let subject = SubjectRef::resolve("ctl_07", true, None, Some(4)).unwrap();
    assert_eq!(subject.canonical_label, "ctl07");
}

#[test]
fn non_numeric_subject_is_not_padded() {
    let subject = SubjectRef::resolve("sub-abc", true, None, Some(5)).unwrap();
    assert_eq!(subject.canonical_label, "abc");
    assert_eq!(subject.raw_label, "sub-abc");
}

#[test]
fn subject_without_label_characters_fails() {
    let err = SubjectRef::resolve("  ", true, None, None).unwrap_err();
    assert_matches!(err, KiraError::InvalidSubjectLabel(_));
}
