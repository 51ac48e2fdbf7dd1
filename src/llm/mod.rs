//! LLM provider clients
//!
//! The reasoning service behind the fallback router and the configurable
//! handlers both talk to a model through [`LLMClient`]. Concrete clients are
//! created from a [`Provider`], usually built from the `[llm]` section of
//! `meridian.toml`.

/// Core LLM client trait and provider selection.
pub mod client;
/// OpenAI-compatible chat-completions client.
pub mod openai;

pub use client::{GenerationSettings, LLMClient, Provider};
pub use openai::OpenAIClient;
