//! Strata common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Strata components.

pub mod config;
pub mod error;
pub mod page;
pub mod serialization;
pub mod types;
pub mod value;

pub use config::{ArenaConfig, ReleaseThrottle, RowStoreConfig};
pub use error::{Result, StrataError};
pub use page::{DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE, PAGE_HEADER_SIZE};
pub use types::{ActionFlag, ObjType};
pub use value::Value;
