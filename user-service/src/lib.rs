//! User Service - permission-aware user record access with an audit trail.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
