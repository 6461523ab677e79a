/// Single-slot JSON files shared by the status and summary records.
///
/// Uses atomic write pattern: write to a temp file in the same directory,
/// then rename, so readers never see a partial write.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temp file next to the target: `.<file name>.tmp.<pid>`.
    fn tmp_path(&self) -> PathBuf {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "warden".to_string());
        dir.join(format!(".{name}.tmp.{}", std::process::id()))
    }

    /// Atomically replace the file with `value` as pretty JSON.
    pub fn write<T: Serialize>(&self, value: &T) -> Result<(), JsonFileError> {
        let json = serde_json::to_string_pretty(value).map_err(|e| JsonFileError::Serialize {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| JsonFileError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| JsonFileError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })
    }

    /// Read the file back. A missing file is `None`, not an error.
    pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>, JsonFileError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(JsonFileError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| JsonFileError::Serialize {
                path: self.path.clone(),
                source: e,
            })
    }
}

/// Errors from JSON file operations.
#[derive(Debug)]
pub enum JsonFileError {
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for JsonFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonFileError::Serialize { path, source } => {
                write!(f, "failed to (de)serialize {}: {source}", path.display())
            }
            JsonFileError::Write { path, source } => {
                write!(f, "failed to write temp file {}: {source}", path.display())
            }
            JsonFileError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
            JsonFileError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for JsonFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JsonFileError::Serialize { source, .. } => Some(source),
            JsonFileError::Write { source, .. } => Some(source),
            JsonFileError::Rename { source, .. } => Some(source),
            JsonFileError::Read { source, .. } => Some(source),
        }
    }
}
