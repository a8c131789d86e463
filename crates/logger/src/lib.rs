//! Shared tracing bootstrap for the uplert binaries.

mod subscriber;

pub use subscriber::{init_tracing, init_tracing_with_level};
