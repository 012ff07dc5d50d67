use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why the gate configuration could not be resolved.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("cannot read gate config {}: {source}", .path.display())]
    Unreadable {
        /// The file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A layer is not TOML, or does not fit the gate's config schema.
    #[error("{origin} is not a valid gate config: {source}")]
    Malformed {
        /// File path, or `<embedded defaults>` / `<merged config>`.
        origin: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A config file is larger than the loader accepts.
    #[error("gate config {} is {size} bytes, the limit is {limit}", .path.display())]
    TooLarge {
        /// The file.
        path: PathBuf,
        /// Its size in bytes.
        size: u64,
        /// Largest accepted size in bytes.
        limit: u64,
    },

    /// A merged value is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Dotted field path, e.g. `terminal.policy`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `CKS_*` environment variable could not be applied.
    #[error("{var_name}: {message}")]
    Env {
        /// Name of the variable.
        var_name: String,
        /// What is wrong with its value.
        message: String,
    },

    /// No home directory to look for the user layer in.
    #[error("no home directory to look for .cks/config.toml in")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
