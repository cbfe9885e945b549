//! # Cadence Core
//!
//! Scheduler core for campaign lifecycle transitions. Campaigns are rows in a
//! relational system of record; while a campaign is delivering, a
//! denormalized record set lives in a key-value delivery store that serving
//! layers read from.
//!
//! ## Overview
//!
//! - **Claim passes** ([`lifecycle::claim`]): every tick, each edge (start,
//!   end) pages through imminent rows and flips them into a claim marker,
//!   while a recovery pass re-drives rows a previous process left marked.
//! - **Reservations** ([`lifecycle::reservation`]): claimed rows are bound
//!   to their boundary time and handed to a bounded execution pool when it
//!   arrives.
//! - **Transitions** ([`lifecycle::engine`]): one relational transaction per
//!   campaign, compare-and-swap on `updated_at`, materialization of the
//!   delivery record set, then a control event.
//! - **Reconciliation** ([`lifecycle::reconcile`], [`lifecycle::budget`]):
//!   queue consumers applying operator mutations and budget verdicts.
//!
//! ## Feature Flags
//!
//! - `database` (default): MySQL system of record and the Redis delivery
//!   store, queue and topic adapters.
//!
//! The in-memory adapters in [`infra::memory`] are always available.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod error;

pub mod infra;

pub mod lifecycle;

pub mod metrics;

/// Capability traits implemented by the store, queue and topic adapters
pub mod ports;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{CampaignError, Result};
pub use lifecycle::{LifecycleConfig, LifecycleEdge, LifecyclePorts, LifecycleRuntime};
pub use metrics::LifecycleMetrics;
