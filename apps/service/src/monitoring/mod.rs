//! Probing and scheduling of monitored targets.

pub mod checker;
pub mod job;
pub mod scheduler;
pub mod types;
pub mod validation;
