use std::path::{Path, PathBuf};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error returned by one of the [`B2Client`](crate::client::B2Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum B2Error {
    #[error("Authorization failed: {reason}")]
    Auth {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{operation} failed: {reason}")]
    Api {
        operation: &'static str,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Download to {} failed: {reason}", target.display())]
    Download {
        target: PathBuf,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{0}")]
    Argument(String),
}

impl B2Error {
    pub fn auth(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Auth {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn api(
        operation: &'static str,
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Api {
            operation,
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn download(
        target: &Path,
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Download {
            target: target.to_path_buf(),
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Process exit code reported by the CLI for this class of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) => 2,
            Self::Auth { .. } => 3,
            Self::Api { .. } => 4,
            Self::Download { .. } => 5,
        }
    }
}
