//! Runtime: lifecycle of the running service.

pub mod lifecycle;

pub use lifecycle::Application;
