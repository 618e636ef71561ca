//! `cr-assistant`: client for the Assistants-style conversation API.
//!
//! [`AssistantBackend`] is the seam the relay runtime talks to; it covers
//! the thread, run and message resources a chat request touches.
//! [`RestAssistantClient`] implements it over HTTP. Because every tenant
//! brings its own API key, clients are minted per request through a
//! [`BackendConnector`], which keeps one shared connection pool.

pub mod backend;
pub mod rest;

pub use backend::{AssistantBackend, BackendConnector};
pub use rest::{from_reqwest, RestAssistantClient, RestConnector};
