//! Core types, config, errors, session registry, and provider traits for Voxflow.

pub mod config;
pub mod error;
pub mod protocol;
pub mod providers;
pub mod session;
