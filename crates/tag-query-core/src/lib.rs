//! Core configuration and request models for the tag query language
//!
//! This crate provides:
//! - Query limits and tunables (`QueryConfig`, environment parsing)
//! - Request-scoped models (`SearchContext`, `Identity`, `Role`)

#![forbid(unsafe_code)]

pub mod config;
pub mod models;

pub use config::{QueryConfig, env_value};
pub use models::{Identity, Role, SearchContext};
