//! Common types for Crimson
//!
//! This crate holds the pieces shared by every other Crimson crate: the error
//! taxonomy, core identifier and range types, and configuration structures.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, StoreConfig, WriteClientConfig};
pub use error::{Error, Result};
pub use types::{AttrNamespace, CollectionName, ObjectName, Range};
