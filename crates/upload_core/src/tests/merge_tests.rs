use super::*;
use crate::record::SelectedFile;
use std::sync::Arc;

fn record(name: &str, size: usize) -> FileRecord {
    FileRecord::new(Arc::new(SelectedFile::new(name, vec![0u8; size])), true)
}

fn names(value: &FileListValue) -> Vec<String> {
    value
        .iter()
        .flatten()
        .map(|record| record.file.name.clone())
        .collect()
}

fn policy(multiplicity: Multiplicity, max_size: Option<u64>) -> UploadPolicy {
    UploadPolicy {
        multiplicity,
        max_size,
    }
}

#[test]
fn empty_submission_keeps_existing_list() {
    let existing = vec![record("a.txt", 1), record("b.txt", 1)];
    let outcome = merge_file_value(
        Vec::new(),
        Some(existing.as_slice()),
        &policy(Multiplicity::Unbounded, None),
    );
    assert_eq!(outcome.value, Some(existing));
    assert!(outcome.error.is_none());
}

#[test]
fn empty_submission_on_empty_list_is_absent() {
    let outcome = merge_file_value(Vec::new(), None, &policy(Multiplicity::Single, None));
    assert!(outcome.value.is_none());
}

#[test]
fn single_file_mode_replaces_previous_selection() {
    let single = policy(Multiplicity::Single, None);
    let first = merge_file_value(vec![record("a", 1), record("b", 1)], None, &single);
    assert_eq!(names(&first.value), ["b"]);

    let second = merge_file_value(vec![record("c", 1)], first.value.as_deref(), &single);
    assert_eq!(names(&second.value), ["c"]);
}

#[test]
fn capped_list_evicts_oldest_without_error() {
    let capped = policy(Multiplicity::AtMost(3), None);
    let mut value: FileListValue = None;
    for name in ["a", "b", "c", "d"] {
        let outcome = merge_file_value(vec![record(name, 1)], value.as_deref(), &capped);
        assert!(outcome.error.is_none());
        value = outcome.value;
    }
    assert_eq!(names(&value), ["b", "c", "d"]);
}

#[test]
fn capped_list_within_limit_keeps_everything() {
    let outcome = merge_file_value(
        vec![record("a", 1), record("b", 1)],
        None,
        &policy(Multiplicity::AtMost(5), None),
    );
    assert_eq!(names(&outcome.value), ["a", "b"]);
}

#[test]
fn zero_cap_drops_every_submission() {
    let existing = vec![record("a", 1)];
    let outcome = merge_file_value(
        vec![record("b", 1)],
        Some(existing.as_slice()),
        &policy(Multiplicity::AtMost(0), None),
    );
    assert!(outcome.value.is_none());
}

#[test]
fn unbounded_list_appends_after_existing_records() {
    let existing = vec![record("a", 1)];
    let existing_id = existing[0].id;
    let outcome = merge_file_value(
        vec![record("b", 1), record("c", 1)],
        Some(existing.as_slice()),
        &policy(Multiplicity::Unbounded, None),
    );
    let value = outcome.value.expect("list");
    assert_eq!(value.len(), 3);
    assert_eq!(value[0].id, existing_id);
    assert!(Arc::ptr_eq(&value[0].file, &existing[0].file));
}

#[test]
fn oversized_files_are_dropped_with_one_error() {
    let outcome = merge_file_value(
        vec![record("big.bin", 150), record("ok.bin", 50), record("huge.bin", 500)],
        None,
        &policy(Multiplicity::Unbounded, Some(100)),
    );
    assert_eq!(names(&outcome.value), ["ok.bin"]);
    assert_eq!(
        outcome.error,
        Some(UploadError::SizeExceeded {
            rejected: 2,
            max_size: 100
        })
    );
}

#[test]
fn size_limit_is_inclusive() {
    let outcome = merge_file_value(
        vec![record("edge.bin", 100)],
        None,
        &policy(Multiplicity::Single, Some(100)),
    );
    assert_eq!(names(&outcome.value), ["edge.bin"]);
    assert!(outcome.error.is_none());
}

#[test]
fn rejected_only_submission_leaves_existing_list() {
    let existing = vec![record("a", 10)];
    let outcome = merge_file_value(
        vec![record("big", 150)],
        Some(existing.as_slice()),
        &policy(Multiplicity::Single, Some(100)),
    );
    assert_eq!(names(&outcome.value), ["a"]);
    assert!(matches!(
        outcome.error,
        Some(UploadError::SizeExceeded { rejected: 1, .. })
    ));
}
