//! Prompt construction and response parsing for planning and generation.

use std::fmt::Write as _;

use serde::Deserialize;

use lectern_core::{
    defaults, Chunk, ChunkPlan, Error, GeneratedItem, GenerationPlan, Result, SourceUnit,
};

pub const PLAN_SYSTEM_PROMPT: &str = "You plan study material for a textbook. \
For each chunk of source text decide which kinds of items to write and how many. \
Allowed kinds: mcq, short_answer, flashcard, summary. \
Skip chunks with no teachable content by giving them no items. \
Reply with JSON only: {\"chunks\": [{\"chunk_id\": \"...\", \"items\": [{\"kind\": \"mcq\", \"count\": 2}]}]}. \
Use the chunk ids exactly as given.";

pub const GENERATE_SYSTEM_PROMPT: &str = "You write study material from textbook passages. \
Produce exactly the requested number of items of each kind, grounded only in the passage. \
Reply with JSON only: {\"items\": [{\"kind\": \"mcq\", \"content\": {...}}]}. \
For mcq use content {\"question\", \"options\", \"answer\"}; for short_answer and flashcard \
{\"question\", \"answer\"}; for summary {\"text\"}.";

/// Planner user prompt: every chunk id with its heading and a text preview.
pub fn plan_prompt(units: &[SourceUnit]) -> String {
    let mut prompt = String::new();
    for unit in units {
        let _ = writeln!(prompt, "## Unit: {}", unit.label);
        for chunk in &unit.chunks {
            let _ = writeln!(
                prompt,
                "- chunk_id: {}\n  heading: {}\n  preview: {}",
                chunk.id,
                chunk.heading.as_deref().unwrap_or("(none)"),
                preview(&chunk.text, defaults::PLAN_PREVIEW_CHARS)
            );
        }
        prompt.push('\n');
    }
    prompt
}

/// Generator user prompt: the passage plus the requested quotas.
pub fn generate_prompt(chunk: &Chunk, work: &ChunkPlan) -> String {
    let mut prompt = String::new();
    if let Some(ref heading) = chunk.heading {
        let _ = writeln!(prompt, "Section: {}", heading);
    }
    prompt.push_str("Requested items:\n");
    for quota in work.items.iter().filter(|q| q.count > 0) {
        let _ = writeln!(prompt, "- {} x {}", quota.count, quota.kind);
    }
    let _ = write!(prompt, "\nPassage:\n{}\n", chunk.text);
    prompt
}

/// First `max_chars` characters of `text` on one line.
fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// Pull the JSON object out of a model reply, tolerating code fences and
/// surrounding prose.
pub fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

/// Parse a planner reply into a [`GenerationPlan`].
pub fn parse_plan(response: &str) -> Result<GenerationPlan> {
    let json = extract_json(response)
        .ok_or_else(|| Error::Planning("Planner reply contained no JSON object".to_string()))?;
    serde_json::from_str(json).map_err(|e| Error::Planning(format!("Malformed plan: {}", e)))
}

#[derive(Deserialize)]
struct GenerationReply {
    #[serde(default)]
    items: Vec<GeneratedItem>,
}

/// Parse a generator reply into items.
pub fn parse_items(response: &str) -> Result<Vec<GeneratedItem>> {
    let json = extract_json(response)
        .ok_or_else(|| Error::Generation("Generator reply contained no JSON object".to_string()))?;
    let reply: GenerationReply = serde_json::from_str(json)
        .map_err(|e| Error::Generation(format!("Malformed items: {}", e)))?;
    Ok(reply.items)
}
