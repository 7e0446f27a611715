//! OpenAI-compatible chat API.
//!
//! Works with any endpoint that implements `/chat/completions`: OpenAI,
//! OpenRouter, Ollama in OpenAI mode, vLLM, LM Studio.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ChatClient, ChatPrompt};
pub use error::{to_lectern_error, OpenAIErrorCode};
