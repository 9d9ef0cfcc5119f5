//! HTTP API handlers.

pub mod auth;
pub mod seckill;

pub use auth::{AdminSecret, AdminToken, BuyerId, USER_ID_HEADER};
