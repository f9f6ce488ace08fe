//! # lumen-core
//!
//! Core types, traits, and abstractions for the lumen image library.
//!
//! This crate provides the job and similarity data model, the error type
//! shared by every crate, and the collaborator ports the job engine talks to.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, RepositoryErrorKind, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
