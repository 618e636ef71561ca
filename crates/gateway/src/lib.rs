//! ChatRelay gateway: HTTP API, request orchestration and CLI.
//!
//! A widget message travels `api::chat` → [`runtime::ChatRelay`], which
//! resolves the tenant's key, picks a thread, drives one assistant run and
//! answers its tool calls along the way.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod server;
pub mod state;
