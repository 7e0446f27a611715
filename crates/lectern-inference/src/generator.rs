//! LLM-backed item generator.

use async_trait::async_trait;
use tracing::debug;

use lectern_core::{defaults, Chunk, ChunkPlan, GeneratedItem, Generator, Result};

use crate::openai::{ChatClient, ChatPrompt};
use crate::prompts::{generate_prompt, parse_items, GENERATE_SYSTEM_PROMPT};

/// [`Generator`] that asks the configured generation model to write the
/// planned items for one chunk.
#[derive(Clone)]
pub struct LlmGenerator {
    client: ChatClient,
}

impl LlmGenerator {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, chunk: &Chunk, work: &ChunkPlan) -> Result<Vec<GeneratedItem>> {
        let model = &self.client.config().gen_model;
        let user = generate_prompt(chunk, work);
        let reply = self
            .client
            .complete_with_retry(&ChatPrompt {
                model,
                system: GENERATE_SYSTEM_PROMPT,
                user: &user,
                temperature: Some(defaults::LLM_GEN_TEMPERATURE),
                json: true,
            })
            .await?;
        let items = parse_items(&reply)?;

        debug!(
            subsystem = "inference",
            component = "generator",
            op = "generate",
            chunk_id = %chunk.id,
            item_count = items.len(),
            "Items generated"
        );
        Ok(items)
    }
}
