//! AWS SQS emulation for Queuestack
//!
//! Provides the in-memory queue core with support for:
//! - CreateQueue, DeleteQueue, ListQueues
//! - SendMessage, ReceiveMessage, DeleteMessage
//! - Delay, visibility timeouts, FIFO ordering and deduplication
//! - Dead-letter redirection and explicit redrive
//!
//! `handlers` maps the two wire dialects (form-encoded/XML and
//! JSON-with-`X-Amz-Target`) onto the same operations.

pub mod handlers;
pub mod message;
pub mod params;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod xml;

pub use handlers::handle_request;
pub use message::Message;
pub use queue::Queue;
pub use registry::QueueRegistry;
