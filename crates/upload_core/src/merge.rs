//! Combines newly selected files with the current list under the upload policy.

use shared::domain::{Multiplicity, UploadPolicy};

use crate::{
    error::UploadError,
    record::{FileListValue, FileRecord},
};

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub value: FileListValue,
    /// At most one error per submission, however many files were rejected.
    pub error: Option<UploadError>,
}

/// Filters `new_files` by size, appends the survivors after `existing` and
/// trims the result to the policy's multiplicity, keeping the newest records.
pub fn merge_file_value(
    new_files: Vec<FileRecord>,
    existing: Option<&[FileRecord]>,
    policy: &UploadPolicy,
) -> MergeOutcome {
    let (accepted, error) = match policy.max_size {
        Some(max_size) => {
            let (accepted, rejected): (Vec<_>, Vec<_>) = new_files
                .into_iter()
                .partition(|record| record.file.size() <= max_size);
            let error = (!rejected.is_empty()).then(|| UploadError::SizeExceeded {
                rejected: rejected.len(),
                max_size,
            });
            (accepted, error)
        }
        None => (new_files, None),
    };

    let mut total: Vec<FileRecord> = existing.map(<[FileRecord]>::to_vec).unwrap_or_default();
    total.extend(accepted);

    let keep = match policy.multiplicity {
        Multiplicity::Single => 1,
        Multiplicity::Unbounded => total.len(),
        Multiplicity::AtMost(limit) => limit as usize,
    };
    if total.len() > keep {
        total.drain(..total.len() - keep);
    }

    MergeOutcome {
        value: (!total.is_empty()).then_some(total),
        error,
    }
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
