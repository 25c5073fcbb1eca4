//! Schema validation seam.

use std::path::Path;

use crate::{Error, Result};

/// Structural validation of a CSDL schema.
///
/// Implementations return [`crate::Error::InvalidSchema`] with a readable
/// detail when the document is malformed.
pub trait SchemaValidator: Send + Sync {
    /// Validate a schema already read into memory.
    fn validate_contents(&self, contents: &[u8]) -> Result<()>;

    fn validate(&self, path: &Path) -> Result<()> {
        let contents = std::fs::read(path).map_err(|e| {
            Error::InvalidSchema(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.validate_contents(&contents)
    }
}
