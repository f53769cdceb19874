//! # Bulwark Core
//!
//! The domain layer of the Bulwark request-defense pipeline.
//! This crate contains the error taxonomy, the security records and the ports
//! that infrastructure implements. It has zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use error::{AppError, ErrorKind, Severity};
