use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid artifact pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("`{0}` is not a valid module name")]
    InvalidModuleName(String),

    #[error("module identifier `{ident}` is shared by `{first}` and `{second}`")]
    IdentifierClash {
        ident: String,
        first: String,
        second: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
