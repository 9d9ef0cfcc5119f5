//! Application initialization.
//!
//! - **`resources`**: connections to `PostgreSQL`, Redis and Redpanda, breakers
//! - **`gates`**: admission gates per route class, local or distributed
//! - **`builder`**: wires pipeline, materializer pool and router into an
//!   [`Application`](crate::runtime::Application)

pub mod builder;
pub mod gates;
pub mod resources;

pub use builder::ApplicationBuilder;
pub use gates::{distributed_gates, local_gates};
pub use resources::Resources;
