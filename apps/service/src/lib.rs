//! Scheduled URL liveness monitoring.
//!
//! A [`registry::JobRegistry`] owns one fixed-rate schedule per monitored URL.
//! Every tick probes the URL, appends the result to the project's bounded log,
//! pushes it to live subscribers through [`fanout::Fanout`] and raises an alert
//! for configured status codes. [`server::Server`] exposes the control and log
//! channels over WebSocket.

pub mod alerting;
pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod fanout;
pub mod logs;
pub mod monitoring;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testing;
