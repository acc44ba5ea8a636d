//! Per-file error taxonomy for indexing.
//!
//! Every variant names the file it concerns. None of them abort a sync:
//! the synchronizer records them in the report and moves on. Fatal
//! problems (bad configuration, unreachable database) stay `anyhow`
//! errors at the application layer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("cannot read {file}: {source}")]
    FileRead {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("embedding failed for {file}: {reason}")]
    Embed { file: String, reason: String },

    #[error("store rejected {file}: {reason}")]
    Store { file: String, reason: String },

    #[error("manifest {} is corrupt: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },
}

impl IndexError {
    pub fn parse(file: &str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            file: file.to_string(),
            reason: err.to_string(),
        }
    }

    /// Wraps an `anyhow` error, keeping its context chain in the message.
    pub fn embed(file: &str, err: &anyhow::Error) -> Self {
        Self::Embed {
            file: file.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub fn store(file: &str, err: &anyhow::Error) -> Self {
        Self::Store {
            file: file.to_string(),
            reason: format!("{:#}", err),
        }
    }

    /// The library-relative file the error concerns; empty for the manifest.
    pub fn file(&self) -> &str {
        match self {
            Self::FileRead { file, .. }
            | Self::Parse { file, .. }
            | Self::Embed { file, .. }
            | Self::Store { file, .. } => file,
            Self::ManifestCorrupt { .. } => "",
        }
    }

    /// Short label used in sync summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileRead { .. } => "read",
            Self::Parse { .. } => "parse",
            Self::Embed { .. } => "embed",
            Self::Store { .. } => "store",
            Self::ManifestCorrupt { .. } => "manifest",
        }
    }
}
