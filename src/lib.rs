//! # Rotation Engine
//!
//! Multi-account API key rotation and quota-arbitration engine for a
//! long-running AI coding assistant.

pub mod config;
pub mod engine;
pub mod error;
pub mod keyring;
pub mod logging;
pub mod monitor;
pub mod probe;
pub mod refresh;
pub mod selector;
pub mod sources;

pub use config::EngineConfig;
pub use engine::{Engine, HookEnvelope};
pub use error::{EngineError, Result};
