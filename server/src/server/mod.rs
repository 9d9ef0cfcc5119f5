//! HTTP server: state, routes, readiness.

pub mod health;
pub mod routes;
pub mod state;

pub use health::{DependencyProbe, RedisProbe, RepositoryProbe};
pub use routes::{RouteGates, build_router};
pub use state::AppState;
