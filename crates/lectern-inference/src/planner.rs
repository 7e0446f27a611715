//! LLM-backed planner.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument};

use lectern_core::{defaults, GenerationPlan, Planner, PlanningContext, Result, SourceUnit};

use crate::openai::{ChatClient, ChatPrompt};
use crate::prompts::{parse_plan, plan_prompt, PLAN_SYSTEM_PROMPT};

/// [`Planner`] that asks the configured plan model for per-chunk quotas.
#[derive(Clone)]
pub struct LlmPlanner {
    client: ChatClient,
}

impl LlmPlanner {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    #[instrument(skip(self, units), fields(job_id = %ctx.job_id, textbook_id = %ctx.textbook_id))]
    async fn plan(&self, ctx: &PlanningContext, units: &[SourceUnit]) -> Result<GenerationPlan> {
        let start = Instant::now();
        let model = self.client.config().plan_model.clone();
        let user = plan_prompt(units);
        let reply = self
            .client
            .complete_with_retry(&ChatPrompt {
                model: &model,
                system: PLAN_SYSTEM_PROMPT,
                user: &user,
                temperature: Some(defaults::LLM_PLAN_TEMPERATURE),
                json: true,
            })
            .await?;
        let plan = parse_plan(&reply)?;

        info!(
            subsystem = "inference",
            component = "planner",
            op = "plan",
            model = %model,
            chunk_count = plan.chunks.len(),
            item_count = plan.total_items(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation plan produced"
        );
        Ok(plan)
    }
}
