use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when configuring or recording a benchmark run.
///
/// Correctness failures observed during a run (lost counter updates, a dinner that never
/// finishes) are not errors. They are reported as values in the run outcome so that callers
/// can inspect them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A benchmark parameter was out of its valid range. Raised before any worker starts.
    #[error("invalid configuration: '{parameter}' {problem}")]
    InvalidConfiguration {
        /// The name of the offending parameter.
        parameter: &'static str,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration file {}: {source}", path.display())]
    ConfigFile {
        /// The file that was being loaded.
        path: PathBuf,

        /// The underlying parse error.
        source: toml::de::Error,
    },

    /// Reading a configuration file or writing results failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serializing results to CSV failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn invalid(parameter: &'static str, problem: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            problem: problem.into(),
        }
    }
}

/// A specialized `Result` type for benchmark operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
