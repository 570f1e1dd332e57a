//! Core types shared across Queuestack
//!
//! This crate provides the error taxonomy, ARN helpers and request IDs used
//! by the service crate and the server binary.

pub mod arn;
pub mod error;
pub mod request_id;

pub use error::{ErrorKind, SqsError};
pub use request_id::RequestId;
