//! Shared HTTP handlers.

pub mod health;

pub use health::{DependencyCheck, HealthStatus, ReadinessReport, health_check};
