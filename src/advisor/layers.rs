use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fsutil::{self, FileOpenError};

/// Layer metadata of the image a container runs, base layer first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    #[serde(default)]
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Content of the layer; empty when only the history is known.
    #[serde(default)]
    pub files: Vec<LayerFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFile {
    pub path: String,
    pub size_bytes: u64,
    /// Content hash, e.g. `sha256:…`.
    pub digest: String,
}

impl LayerInfo {
    pub fn total_size(&self) -> u64 {
        self.layers
            .iter()
            .fold(0u64, |acc, l| acc.saturating_add(l.size_bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error(transparent)]
    Open(#[from] FileOpenError),
    #[error("invalid layer metadata in `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads [`LayerInfo`] from a JSON file.
///
/// # Errors
///
/// Returns a [`LayerError`] if the file cannot be opened or is not valid metadata.
pub fn load_layer_info(path: impl AsRef<Path>) -> Result<LayerInfo, LayerError> {
    let path = path.as_ref();
    let reader = fsutil::open_file_reader(path)?;
    serde_json::from_reader(reader).map_err(|source| LayerError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
