use serde::{Deserialize, Serialize};

/// Body of a successful (HTTP 200) upload response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl UploadResponse {
    pub fn accepted(url: impl Into<String>) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
        }
    }

    pub fn rejected() -> Self {
        Self {
            success: false,
            url: None,
        }
    }
}
