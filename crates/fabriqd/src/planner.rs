//! Query planner - turns a free-text question into one restricted query
//! expression, or a refusal sentinel.
//!
//! The remote path goes through the shared [`LlmRouter`] (model-list
//! fallback, backoff on transient failures, temperature 0). When every
//! remote attempt fails the local heuristic planner takes over, so
//! planning as a whole never comes back empty-handed.

use crate::heuristic;
use crate::schema::SchemaDescriptor;
use fabriq_common::llm::LlmRouter;
use fabriq_common::PlanSource;
use std::sync::Arc;
use tracing::{info, warn};

/// Sentinel the model emits for questions the schema cannot answer.
pub const SENTINEL_OFFTOPIC: &str = "OFFTOPIC";
/// Sentinel the model emits for write requests.
pub const SENTINEL_FORBIDDEN: &str = "FORBIDDEN";

/// Outcome of the planning stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// A candidate query expression, not yet validated.
    Query { text: String, source: PlanSource },
    /// The model declared the question unanswerable from the schema.
    OffTopic,
    /// The model declared the question a write request.
    Forbidden,
}

pub struct Planner {
    router: Option<Arc<LlmRouter>>,
    schema: &'static SchemaDescriptor,
}

impl Planner {
    /// `router: None` runs fallback-only (LLM disabled in config).
    pub fn new(router: Option<Arc<LlmRouter>>, schema: &'static SchemaDescriptor) -> Self {
        Self { router, schema }
    }

    pub async fn plan(&self, question: &str) -> Plan {
        if let Some(router) = &self.router {
            let prompt = self.build_prompt(question);
            match router.generate(&prompt).await {
                Ok(raw) => {
                    let cleaned = clean_output(&raw);
                    if cleaned.is_empty() {
                        warn!("planner returned empty output, using local fallback");
                    } else {
                        match cleaned.to_uppercase().as_str() {
                            SENTINEL_OFFTOPIC => return Plan::OffTopic,
                            SENTINEL_FORBIDDEN => return Plan::Forbidden,
                            _ => {
                                return Plan::Query {
                                    text: cleaned,
                                    source: PlanSource::Llm,
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("all remote planner attempts failed ({}), using local fallback", e);
                }
            }
        }

        let text = heuristic::fallback_plan(question);
        info!(plan = %text, "local heuristic plan");
        Plan::Query {
            text,
            source: PlanSource::Fallback,
        }
    }

    fn build_prompt(&self, question: &str) -> String {
        format!(
            r#"You are a MongoDB data analyst for an e-commerce application. Your ONLY job is to turn a user's question into one precise, machine-readable, READ-ONLY MongoDB query.

=== DATABASE SCHEMA ===
{schema}

=== USER QUESTION ===
"{question}"

=== PRIMARY RULE ===
If the question is conversational, off-topic, or cannot be answered from the schema above, ignore every other rule and reply with the single word: {offtopic}

=== SECURITY RULES ===
- READ-ONLY: only `find`, `countDocuments` and `aggregate` are permitted.
- If the user asks for anything that modifies data, reply with the single word: {forbidden}

=== OUTPUT RULES ===
1. Reply with the raw query string ONLY - no prose, no code fences.
2. Use the exact syntax db.collectionName.method(arguments).
3. Permitted shapes: db.c.find(filter).limit(n), db.c.find(filter, projection), db.c.countDocuments(filter), db.c.aggregate([...]).
4. For sorting, joining or grouping use one aggregate pipeline; never chain other methods.
5. Use ISODate("YYYY-MM-DD") for date comparisons and ObjectId("...") for id values.
6. For broad questions add a projection with only the important fields."#,
            schema = self.schema.prompt_block(),
            question = question,
            offtopic = SENTINEL_OFFTOPIC,
            forbidden = SENTINEL_FORBIDDEN,
        )
    }
}

/// Strip code fences, a trailing statement terminator and whitespace from
/// raw model output.
pub fn clean_output(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        // Drop the opening fence (with optional language tag) and the
        // closing fence if present.
        text = text.trim_start_matches("```");
        if let Some(rest) = text.split_once('\n') {
            let head = rest.0.trim();
            if head.chars().all(|c| c.is_ascii_alphanumeric()) && !head.is_empty() {
                text = rest.1;
            }
        }
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
    }

    let text = text.trim();
    let text = text.strip_suffix(';').unwrap_or(text);
    text.trim().to_string()
}
