//! Boot configuration assembly from per-device config files.

use bootz_core::BootConfigFiles;
use bootz_proto::BootConfig;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::EntityError;

#[derive(Debug, Error)]
pub enum BootConfigError {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse OpenConfig document {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl From<BootConfigError> for EntityError {
    fn from(err: BootConfigError) -> Self {
        match err {
            BootConfigError::Io { path, source } => EntityError::Io { path, source },
            BootConfigError::Parse { path, reason } => EntityError::Parse { path, reason },
        }
    }
}

/// Build a `BootConfig` from the files named in `files`.
///
/// Relative paths are resolved against `base_dir`. The vendor file is
/// served verbatim. The OpenConfig file must hold a JSON object and is
/// served re-encoded in compact form. An empty file name leaves that half
/// of the config empty.
pub fn populate_boot_config(
    files: &BootConfigFiles,
    base_dir: &Path,
) -> Result<BootConfig, BootConfigError> {
    let mut config = BootConfig::default();

    if !files.vendor_config_file.is_empty() {
        let path = base_dir.join(&files.vendor_config_file);
        config.vendor_config =
            std::fs::read(&path).map_err(|source| BootConfigError::Io { path, source })?;
    }

    if !files.oc_config_file.is_empty() {
        let path = base_dir.join(&files.oc_config_file);
        let text = std::fs::read_to_string(&path).map_err(|source| BootConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let document: Map<String, Value> =
            serde_json::from_str(&text).map_err(|e| BootConfigError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        config.oc_config = serde_json::to_vec(&document).map_err(|e| BootConfigError::Parse {
            path,
            reason: e.to_string(),
        })?;
    }

    Ok(config)
}
