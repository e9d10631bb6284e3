//! Shared kernel - Common types used across the call-handling core

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::CallError;
pub use result::Result;
pub use value_objects::*;
