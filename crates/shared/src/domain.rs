use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseMultiplicityError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(RecordId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Init,
    InProgress,
    Success,
    Fail,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Init => "init",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Success => "success",
            UploadStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// How many files the list may hold at once.
///
/// Serialized as `false` (one file, replacing), `true` (unbounded) or a
/// non-negative integer cap where the oldest entries are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawMultiplicity", into = "RawMultiplicity")]
pub enum Multiplicity {
    #[default]
    Single,
    Unbounded,
    AtMost(u32),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawMultiplicity {
    Flag(bool),
    Limit(u32),
}

impl From<RawMultiplicity> for Multiplicity {
    fn from(value: RawMultiplicity) -> Self {
        match value {
            RawMultiplicity::Flag(false) => Multiplicity::Single,
            RawMultiplicity::Flag(true) => Multiplicity::Unbounded,
            RawMultiplicity::Limit(limit) => Multiplicity::AtMost(limit),
        }
    }
}

impl From<Multiplicity> for RawMultiplicity {
    fn from(value: Multiplicity) -> Self {
        match value {
            Multiplicity::Single => RawMultiplicity::Flag(false),
            Multiplicity::Unbounded => RawMultiplicity::Flag(true),
            Multiplicity::AtMost(limit) => RawMultiplicity::Limit(limit),
        }
    }
}

impl FromStr for Multiplicity {
    type Err = ParseMultiplicityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "false" => Ok(Multiplicity::Single),
            "true" => Ok(Multiplicity::Unbounded),
            other => other
                .parse::<u32>()
                .map(Multiplicity::AtMost)
                .map_err(|_| ParseMultiplicityError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadPolicy {
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub max_size: Option<u64>,
}

/// Coarse file category derived from the extension, for list displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Doc,
    Docx,
    Jpg,
    Pdf,
    Png,
    Ppt,
    Pptx,
    Rar,
    Wps,
    Xls,
    Xlsx,
    Zip,
    Other,
}

impl FileKind {
    pub fn from_file_name(name: &str) -> Self {
        let Some((_, extension)) = name.rsplit_once('.') else {
            return FileKind::Other;
        };
        match extension.to_ascii_uppercase().as_str() {
            "DOC" => FileKind::Doc,
            "DOCX" => FileKind::Docx,
            "JPG" => FileKind::Jpg,
            "PDF" => FileKind::Pdf,
            "PNG" => FileKind::Png,
            "PPT" => FileKind::Ppt,
            "PPTX" => FileKind::Pptx,
            "RAR" => FileKind::Rar,
            "WPS" => FileKind::Wps,
            "XLS" => FileKind::Xls,
            "XLSX" => FileKind::Xlsx,
            "ZIP" => FileKind::Zip,
            _ => FileKind::Other,
        }
    }
}
