use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use shared::domain::{Multiplicity, UploadPolicy};

use crate::{
    error::ConfigError,
    transport::{HttpTransportConfig, TransportSource},
};

pub const DEFAULT_OPTIONS_FILE: &str = "upload.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub multiple: Multiplicity,
    pub max_size: Option<u64>,
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub form_data_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl UploadOptions {
    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy {
            multiplicity: self.multiple,
            max_size: self.max_size,
        }
    }

    /// `TransportSource::None` when no url is configured.
    pub fn transport_source(&self) -> Result<TransportSource, ConfigError> {
        let Some(url) = self.url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Ok(TransportSource::None);
        };
        let mut config = HttpTransportConfig::new(url.trim())?.with_headers(&self.headers)?;
        if let Some(key) = &self.form_data_key {
            config = config.with_form_data_key(key.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(timeout_ms));
        }
        Ok(TransportSource::Http(config))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse upload options")
    }

    /// Overlays `UPLOAD__*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("UPLOAD__URL") {
            self.url = Some(v);
        }
        if let Some(v) = lookup("UPLOAD__MULTIPLE") {
            self.multiple = v
                .parse::<Multiplicity>()
                .with_context(|| format!("invalid UPLOAD__MULTIPLE value '{v}'"))?;
        }
        if let Some(v) = lookup("UPLOAD__MAX_SIZE") {
            self.max_size = Some(
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid UPLOAD__MAX_SIZE value '{v}'"))?,
            );
        }
        if let Some(v) = lookup("UPLOAD__FORM_DATA_KEY") {
            self.form_data_key = Some(v);
        }
        if let Some(v) = lookup("UPLOAD__TIMEOUT_MS") {
            self.timeout_ms = Some(
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid UPLOAD__TIMEOUT_MS value '{v}'"))?,
            );
        }
        Ok(())
    }
}

/// Defaults, then the options file, then the environment.
///
/// An explicit `path` must exist; otherwise `upload.toml` in the working
/// directory is read when present.
pub fn load_options(path: Option<&Path>) -> Result<UploadOptions> {
    let mut options = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read upload options '{}'", path.display()))?;
            UploadOptions::from_toml_str(&raw)
                .with_context(|| format!("in upload options '{}'", path.display()))?
        }
        None => match fs::read_to_string(DEFAULT_OPTIONS_FILE) {
            Ok(raw) => UploadOptions::from_toml_str(&raw)
                .with_context(|| format!("in upload options '{DEFAULT_OPTIONS_FILE}'"))?,
            Err(_) => UploadOptions::default(),
        },
    };

    options.apply_env(|key| std::env::var(key).ok())?;
    Ok(options)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
