//! Shared types for the ChatRelay crates: configuration, the domain error,
//! assistant-backend wire types and structured trace events.

pub mod assistant;
pub mod config;
pub mod error;
pub mod trace;
