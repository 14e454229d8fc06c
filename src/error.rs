use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("failed to read batch specification at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse batch specification: {0}")]
    ConfigParse(String),

    #[error("option(s) need to be specified in batch specification: {}", .0.join(", "))]
    #[diagnostic(help("`destination` and `project` are mandatory"))]
    MissingConfigField(Vec<String>),

    #[error("invalid value for `{field}`: {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("failed to read login file at {0}")]
    LoginRead(PathBuf),

    #[error("no archive server configured (use --server or a login file)")]
    MissingServer,

    #[error("project not found on archive: {0}")]
    ProjectNotFound(String),

    #[error("invalid subject label: {0}")]
    InvalidSubjectLabel(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("archive resource not found: {0}")]
    ArchiveNotFound(String),

    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("fetch of scan {scan} gave up after {attempts} attempt(s): {message}")]
    FetchFailed {
        scan: String,
        attempts: usize,
        message: String,
    },

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KiraError::TransientFetch(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            KiraError::ConfigRead(_)
                | KiraError::ConfigParse(_)
                | KiraError::MissingConfigField(_)
                | KiraError::InvalidConfigValue { .. }
                | KiraError::LoginRead(_)
                | KiraError::MissingServer
                | KiraError::ProjectNotFound(_)
        )
    }
}
