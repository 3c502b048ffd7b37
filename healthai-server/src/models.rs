//! On-disk store for uploaded model artifacts.
//!
//! Files live flat inside one directory and are addressed by their
//! sanitized file name, which doubles as the identifier returned from
//! [`ModelStore::store`]. Storing under an existing name overwrites it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Name used when an upload carries no usable file name.
pub const FALLBACK_MODEL_NAME: &str = "model.bin";

/// Errors raised by the model store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage directory could not be created.
    #[error("failed to create model directory {path}: {source}")]
    CreateDir {
        /// Directory that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Writing a model file failed.
    #[error("failed to write model {name}: {source}")]
    Write {
        /// Sanitized model name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Reading a model file failed for a reason other than absence.
    #[error("failed to read model {name}: {source}")]
    Read {
        /// Sanitized model name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Pass-through file store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Opens the store, creating `dir` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CreateDir`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    /// Directory the store writes into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` under the sanitized form of `name` and returns that
    /// name as the model identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the file cannot be written.
    pub async fn store(&self, name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let mut file_name = sanitize_file_name(name);
        if file_name.is_empty() {
            file_name = FALLBACK_MODEL_NAME.to_string();
        }

        tokio::fs::write(self.dir.join(&file_name), bytes)
            .await
            .map_err(|source| StoreError::Write {
                name: file_name.clone(),
                source,
            })?;

        tracing::info!(model = %file_name, size = bytes.len(), "model stored");
        Ok(file_name)
    }

    /// Reads the model stored under the sanitized form of `id`.
    ///
    /// Returns `Ok(None)` if no such model exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] for I/O failures other than a missing file.
    pub async fn retrieve(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let file_name = sanitize_file_name(id);
        if file_name.is_empty() {
            return Ok(None);
        }

        match tokio::fs::read(self.dir.join(&file_name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => Ok(None),
            Err(source) => Err(StoreError::Read {
                name: file_name,
                source,
            }),
        }
    }
}

/// Reduces a client-supplied file name to a safe, flat name.
///
/// Path separators become word breaks, whitespace runs become `_`, anything
/// outside ASCII alphanumerics and `_ . -` is dropped, and leading/trailing
/// `.` and `_` are trimmed. The result never contains a separator and is
/// never `.` or `..`; it may be empty.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}
