//! Error types for RapidAPI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required argument is missing or malformed.
    #[error("{0}")]
    InvalidInput(String),

    /// The schema file failed structural validation.
    #[error("invalid schema file: {0}")]
    InvalidSchema(String),

    /// A cloud resource step failed; earlier steps are not rolled back.
    #[error("provisioning failed while {step}: {message}")]
    ProvisioningFailed { step: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Container engine or registry failure.
    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cloud request failed: {0}")]
    Cloud(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a failure from a provisioning step.
    ///
    /// Validation and input errors pass through untouched so callers can still
    /// tell them apart from resource failures.
    pub fn during(step: impl Into<String>, err: Error) -> Self {
        match err {
            Error::InvalidInput(_)
            | Error::InvalidSchema(_)
            | Error::ProvisioningFailed { .. } => err,
            other => Error::ProvisioningFailed {
                step: step.into(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_during_wraps_cloud_errors() {
        let err = Error::during(
            "creating storage account",
            Error::Cloud("quota exceeded".to_string()),
        );
        match err {
            Error::ProvisioningFailed { step, message } => {
                assert_eq!(step, "creating storage account");
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("Expected ProvisioningFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_during_keeps_schema_errors() {
        let err = Error::during("validating", Error::InvalidSchema("bad".to_string()));
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn test_message_format() {
        let err = Error::ProvisioningFailed {
            step: "creating resource group".to_string(),
            message: "denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "provisioning failed while creating resource group: denied"
        );
    }
}
