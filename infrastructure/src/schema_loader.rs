//! Loads output schemas from JSON files into a [`SchemaRegistry`].

use orchestra_application::SchemaRegistry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("failed to read schema {uri} from {path}: {source}")]
    Io {
        uri: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema {uri} in {path} is not valid JSON: {source}")]
    Parse {
        uri: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema {uri} is not a supported output schema: {message}")]
    Invalid { uri: String, message: String },
}

/// Read every `uri -> file` entry; relative paths resolve against `base_dir`.
pub fn load_schemas(
    entries: &BTreeMap<String, PathBuf>,
    base_dir: &Path,
) -> Result<SchemaRegistry, SchemaLoadError> {
    let registry = SchemaRegistry::new();
    for (uri, path) in entries {
        let path = if path.is_absolute() {
            path.clone()
        } else {
            base_dir.join(path)
        };
        let text = std::fs::read_to_string(&path).map_err(|source| SchemaLoadError::Io {
            uri: uri.clone(),
            path: path.clone(),
            source,
        })?;
        let doc: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| SchemaLoadError::Parse {
                uri: uri.clone(),
                path: path.clone(),
                source,
            })?;
        registry
            .register_json(uri.clone(), &doc)
            .map_err(|message| SchemaLoadError::Invalid {
                uri: uri.clone(),
                message,
            })?;
        debug!(uri = %uri, path = %path.display(), "Loaded output schema");
    }
    Ok(registry)
}
