//! Pushaas Orchestrations - provisioning core of the push service broker
//!
//! This crate turns "create instance" and "delete instance" requests into
//! ordered stage operations against a container backend. Each instance is
//! three tiers: `push-redis` (cache), `push-stream` with its `push-agent`
//! sidecar (stream) and `push-api` (api).
//!
//! # Usage
//!
//! ```rust,no_run
//! use pushaas_orchestrations::backend::MemoryBackend;
//! use pushaas_orchestrations::config::ProvisionerConfig;
//! use pushaas_orchestrations::orchestrator::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn example(instance: pushaas_models::Instance) -> anyhow::Result<()> {
//! let backend = Arc::new(MemoryBackend::new("pushaas.local"));
//! let orchestrator = Orchestrator::new(backend, ProvisionerConfig::local())?;
//!
//! let result = orchestrator.provision(&instance).await;
//! if result.is_success() {
//!     println!("{:?}", result.variables);
//! }
//! # Ok(())
//! # }
//! ```

pub mod names;
pub mod types;
pub mod error;
pub mod config;
pub mod readiness;

// Cloud side
pub mod backend;
pub mod stages;
pub mod orchestrator;

// Jobs and persistence
pub mod queue;
pub mod worker;
pub mod store;
pub mod cms;
pub mod service;
pub mod registry;

// Re-export key types for convenience
pub use error::*;
pub use types::*;
