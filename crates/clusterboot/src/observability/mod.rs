//! Observability Module
//!
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Subscriber setup (text or JSON, `RUST_LOG` filtering)

pub mod events;
pub mod tracing;

pub use self::tracing::{init_tracing, TracingConfig};
