use std::io;

use thiserror::Error;

/// Everything that can stop a submission from producing an [`ExecutionResult`].
///
/// A program that exits non-zero, fails to compile or runs into the deadline is
/// *not* an error; those are reported through the regular result.
///
/// [`ExecutionResult`]: super::ExecutionResult
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("`language` is required")]
    MissingLanguage,

    #[error("unsupported language `{0}`")]
    UnsupportedLanguage(String),

    #[error("`code` is required")]
    MissingCode,

    #[error("`{field}` exceeds the limit of {limit} bytes")]
    PayloadTooLarge { field: &'static str, limit: usize },

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("sandbox runtime `{runtime}` is unavailable: {source}")]
    RuntimeUnavailable {
        runtime: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch sandbox: {0}")]
    LaunchFailed(String),

    #[error("failed to supervise sandbox: {0}")]
    Supervision(#[source] io::Error),
}

impl ExecError {
    /// Whether the submission itself was at fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingLanguage
                | Self::UnsupportedLanguage(_)
                | Self::MissingCode
                | Self::PayloadTooLarge { .. }
        )
    }
}
