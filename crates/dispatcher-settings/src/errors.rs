//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a usable [`ClientSettings`](crate::ClientSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not JSON.
    #[error("{} is not valid JSON: {source}", .path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The merged settings have a value of the wrong type.
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Settings key, as written in the file.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/dispatcher/client.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /etc/dispatcher/client.json: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_names_the_field() {
        let err = SettingsError::Invalid {
            field: "callTimeoutMs",
            reason: "must be positive".into(),
        };
        assert_eq!(err.to_string(), "invalid callTimeoutMs: must be positive");
    }
}
