//! Ephemeral container execution against a Podman/Docker compatible socket.
//!
//! [`orchestrator::Orchestrator`] drives a single run through precondition
//! checks, creation, a bounded wait and cleanup. Everything talks to the engine
//! through [`engine::EngineClient`].

pub mod commands;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod format;
pub mod models;
pub mod orchestrator;
pub mod report;

pub use error::{Error, Result};
