//! Campaign lifecycle scheduler service.
//!
//! Wires the [`cadence_core`] runtime to MySQL and Redis, parses flags and
//! environment, and exposes ping, health and Prometheus endpoints.

pub mod admin;
pub mod config;
