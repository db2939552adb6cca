//! Generation Client - HTTP transport for the generation engine
//!
//! Implements `generation_engine::GenerationService` over reqwest. Timeouts
//! and authentication live here; the engine itself never retries or aborts
//! a call.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use generation_client::{ClientConfig, HttpGenerationService};
//!
//! let config = ClientConfig::load(Path::new("client.json")).await?.with_env_overrides()?;
//! let service = HttpGenerationService::new(config)?;
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::HttpGenerationService;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
