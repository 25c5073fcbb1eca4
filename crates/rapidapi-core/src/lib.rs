//! Core domain types and traits for the RapidAPI mock service tool.
//!
//! This crate contains:
//! - Project, deployment and configuration records
//! - The error taxonomy shared by every component
//! - Container runtime trait and container types
//! - Cloud provider trait and session types
//! - Credential and schema validation seams

pub mod cloud;
pub mod credentials;
pub mod error;
pub mod project;
pub mod runtime;
pub mod schema;

pub use error::{Error, Result};
pub use project::{AppId, Deployment, Project, RootConfig, RunArgs};
