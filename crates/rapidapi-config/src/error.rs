//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("could not determine the local data directory")]
    NoDataDir,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for rapidapi_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ProjectNotFound(name) => rapidapi_core::Error::NotFound(format!(
                "no project named '{}' has been deployed",
                name
            )),
            ConfigError::Schema(detail) => rapidapi_core::Error::InvalidSchema(detail),
            ConfigError::Io(e) => rapidapi_core::Error::Io(e),
            ConfigError::MissingField(_)
            | ConfigError::InvalidValue { .. }
            | ConfigError::Parse(_)
            | ConfigError::NoDataDir => rapidapi_core::Error::InvalidInput(err.to_string()),
            ConfigError::Json(_) => rapidapi_core::Error::Internal(err.to_string()),
        }
    }
}
