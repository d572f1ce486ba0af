//! tfplug - Terraform Plugin Framework for Rust
//!
//! A framework for building Terraform providers in Rust. Providers, resources
//! and data sources are written against the async traits in this crate and
//! exercised in-process by the acceptance harness in [`testing`].

// Core modules
pub mod context;
pub mod error;
pub mod schema;
pub mod types;

// Provider API modules
pub mod data_source;
pub mod provider;
pub mod resource;

// Helper modules
pub mod import;

// Acceptance test harness
pub mod testing;

// Re-exports for convenience
pub use context::Context;
pub use data_source::{DataSource, DataSourceWithConfigure};
pub use error::{Result, TfplugError};
pub use import::import_state_passthrough_id;
pub use provider::{Provider, ProviderData};
pub use resource::{Resource, ResourceWithConfigure};
pub use schema::{AttributeBuilder, AttributeType, NestedBlockBuilder, Schema, SchemaBuilder};
pub use types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
