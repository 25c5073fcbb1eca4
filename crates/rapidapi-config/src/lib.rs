//! Configuration and local persistence for the RapidAPI mock service tool.
//!
//! This crate handles:
//! - Application settings (settings.kdl)
//! - Project records and the root configuration (JSON files)
//! - CSDL schema validation

pub mod csdl;
pub mod error;
pub mod settings;
pub mod store;

pub use csdl::CsdlValidator;
pub use error::{ConfigError, ConfigResult};
pub use settings::{ImageSettings, KeyVaultSettings, SecretNames, Settings};
pub use store::ProjectStore;
