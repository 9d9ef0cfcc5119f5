//! # Flash Sale Server
//!
//! Admission and fulfillment for limited-stock flash sales.
//!
//! ## Request path
//!
//! ```text
//! POST /seckill ─► admission gate ─► dedup ─► stock ledger ─► intent bus ─► 202
//!                      │ 429           │ 409        │ 409          │ 503 (seat released)
//! ```
//!
//! ## Fulfillment path
//!
//! ```text
//! intent bus ─► materializer workers ─► order repository ─► processed marker ─► ack
//!                                   └─► dead letters after the final attempt
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: admission, compensation, catalog cache, materializer
//! - [`api`]: HTTP handlers and identity extractors
//! - [`server`]: router, state, readiness
//! - [`bootstrap`]: wiring from [`config::Config`]
//! - [`runtime`]: lifecycle and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod pipeline;
pub mod runtime;
pub mod server;

pub use config::Config;
