//! Response cache middleware for axum with grouped invalidation over a
//! Redis-compatible store.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
