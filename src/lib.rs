//! # Meridian - intent routing for analytics assistants
//!
//! Meridian decides which domain handlers should answer a natural-language
//! request, splits compound requests into per-handler sub-requests, runs the
//! handlers under timeouts, and merges their answers into one response with
//! cross-handler insights.
//!
//! ## Overview
//!
//! A request flows through five components:
//!
//! 1. [`IntentRouter`] scores the text against a trigger table (Tier 1)
//! 2. [`FallbackRouter`] asks a reasoning service when Tier 1 is unsure (Tier 2)
//! 3. [`QueryDecomposer`] splits multi-intent requests per handler
//! 4. [`ExecutionScheduler`] invokes the selected handlers concurrently
//! 5. [`ResultAggregator`] merges the results in priority order
//!
//! [`Orchestrator`] wires them together and threads a [`RequestContext`]
//! (conversation history and metrics sink) through each request.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use meridian::{MeridianConfig, Orchestrator, Provider, RequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MeridianConfig::load_or_default("meridian.toml")?;
//!     let provider = config.llm.provider()?;
//!     let llm = Arc::from(provider.create_client(config.llm.generation_settings())?);
//!
//!     let orchestrator = Orchestrator::from_config(&config, llm, None)?;
//!     let ctx = RequestContext::default();
//!
//!     let response = orchestrator.process("show delay rate and forecast demand", &ctx).await?;
//!     println!("{:?}", response.sections);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`agents`] - Routing, decomposition, scheduling, aggregation and handlers
//! - [`intent`] - Policy/data query classification
//! - [`llm`] - Reasoning-service and handler model clients
//! - [`rag`] - Document retrieval for policy questions
//! - [`memory`] - Conversation history
//! - [`metrics`] - Per-request metrics events
//! - [`types`] - Common types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Routing tiers, decomposition, scheduling, aggregation and handlers.
pub mod agents;
/// Command-line parsing and terminal output.
pub mod cli;
/// Query classification.
pub mod intent;
/// LLM provider clients and abstractions.
pub mod llm;
/// Conversation history.
pub mod memory;
/// Per-request metrics.
pub mod metrics;
/// Document retrieval.
pub mod rag;
/// Core types (requests, decisions, results, errors).
pub mod types;
/// Configuration utilities (TOML).
pub mod utils;

// Re-export commonly used types
pub use agents::{
    ExecutionScheduler, FallbackRouter, HandlerRegistry, IntentRouter, Orchestrator,
    QueryDecomposer, RequestContext, ResultAggregator,
};
pub use llm::{LLMClient, Provider};
pub use types::{AppError, Result};
pub use utils::toml_config::MeridianConfig;
