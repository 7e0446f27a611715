//! # lectern-inference
//!
//! Planner and generator implementations for the lectern job engine.
//!
//! - [`LlmPlanner`] / [`LlmGenerator`]: call an OpenAI-compatible chat API
//!   through [`openai::ChatClient`], with model-aware retry on transient errors.
//! - [`mock::MockPlanner`] / [`mock::MockGenerator`]: deterministic stand-ins
//!   with scriptable failures, used by the engine's tests.

pub mod config;
pub mod generator;
pub mod mock;
pub mod openai;
pub mod planner;
pub mod prompts;

pub use config::LlmConfig;
pub use generator::LlmGenerator;
pub use mock::{MockGenerator, MockPlanner};
pub use openai::{ChatClient, ChatPrompt};
pub use planner::LlmPlanner;
