//! Pipeline orchestrator - the single entry point the HTTP boundary calls.
//!
//! Sequence: classify -> (short-circuit) -> plan -> parse/validate ->
//! evaluate arguments -> execute -> synthesize -> classify role. Every
//! failure funnels into the one terminal response shape; nothing escapes
//! uncaught.

use crate::args;
use crate::classifier;
use crate::executor::Executor;
use crate::planner::{Plan, Planner};
use crate::query;
use crate::role::RoleClassifier;
use crate::schema::SchemaDescriptor;
use crate::synthesizer::Synthesizer;
use fabriq_common::{AnswerRole, AskError, AskResponse, PlanSource};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// A terminal response plus the HTTP status it should travel with.
#[derive(Debug, Clone)]
pub struct AskReply {
    pub status: u16,
    pub body: AskResponse,
}

pub struct Pipeline {
    planner: Planner,
    executor: Executor,
    synthesizer: Synthesizer,
    role: RoleClassifier,
    schema: &'static SchemaDescriptor,
}

impl Pipeline {
    pub fn new(
        planner: Planner,
        executor: Executor,
        synthesizer: Synthesizer,
        role: RoleClassifier,
        schema: &'static SchemaDescriptor,
    ) -> Self {
        Self {
            planner,
            executor,
            synthesizer,
            role,
            schema,
        }
    }

    pub async fn ask(&self, question: &str) -> AskReply {
        let request_id = Uuid::new_v4();
        let question = question.trim();
        info!(%request_id, question = %question, "ask received");

        if question.is_empty() {
            return failure(&AskError::EmptyInput, None, None);
        }

        // Local classification before any remote call.
        let flags = classifier::classify(question);
        if flags.is_destructive {
            warn!(%request_id, "destructive intent refused locally");
            return failure(&AskError::Blocked, Some(PlanSource::Blocked), None);
        }
        if flags.is_smalltalk {
            return AskReply {
                status: 200,
                body: AskResponse::success(
                    PlanSource::Smalltalk,
                    None,
                    0,
                    json!([]),
                    classifier::smalltalk_reply().to_string(),
                    AnswerRole::User,
                ),
            };
        }

        // Plan.
        let (query_text, source) = match self.planner.plan(question).await {
            Plan::OffTopic => {
                return failure(&AskError::OffTopic, Some(PlanSource::Llm), None)
            }
            Plan::Forbidden => {
                warn!(%request_id, "planner declared question forbidden");
                return failure(&AskError::Forbidden, Some(PlanSource::Llm), None);
            }
            Plan::Query { text, source } => (text, source),
        };
        info!(%request_id, source = ?source, query = %query_text, "plan ready");

        // Validate, evaluate, execute.
        let result = match self.run_query(&query_text).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%request_id, "pipeline rejected query: {}", e);
                let detail = e
                    .is_planner_rejection()
                    .then(|| format!("{} (query: {})", e, query_text));
                return failure(&e, Some(source), detail);
            }
        };

        // Synthesize and classify the audience.
        let answer = self
            .synthesizer
            .synthesize(question, &query_text, &result)
            .await;
        let role = self.role.classify(&answer).await;
        info!(%request_id, role = ?role, results = result.result_count(), "answered");

        AskReply {
            status: 200,
            body: AskResponse::success(
                source,
                Some(query_text),
                result.result_count(),
                result.to_json(),
                answer,
                role,
            ),
        }
    }

    // Validation and security failures are terminal - a rejected query is
    // never replanned or retried.
    async fn run_query(&self, query_text: &str) -> Result<crate::executor::ResultSet, AskError> {
        let planned = query::parse(query_text, self.schema)?;
        let arguments = args::evaluate(&planned.args_text)?;
        self.executor.execute(&planned, &arguments).await
    }
}

fn failure(error: &AskError, source: Option<PlanSource>, detail: Option<String>) -> AskReply {
    // Failure payloads that carry internals are admin-audience by
    // definition; plain refusals stay user-visible.
    let role = if detail.is_some() {
        AnswerRole::Admin
    } else {
        AnswerRole::User
    };
    AskReply {
        status: error.http_status(),
        body: AskResponse::failure(source, error.public_message().to_string(), detail, role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::STOREFRONT;
    use crate::store::MemoryStore;
    use fabriq_common::llm::{BackoffConfig, FakeGeneration, LlmError, LlmRouter};
    use std::sync::Arc;
    use std::time::Duration;

    fn seeded_store() -> Arc<MemoryStore> {
        let mut store = MemoryStore::new();
        store.insert_many(
            "products",
            vec![
                json!({"product_name": "Summer Shirt", "price": 899, "stock_quantity": 4}),
                json!({"product_name": "Silk Saree", "price": 2499, "stock_quantity": 2}),
                json!({"product_name": "Denim Kurta", "price": 1499, "stock_quantity": 0}),
            ],
        );
        store.insert_many(
            "orders",
            vec![
                json!({"status": "Delivered", "total_amount": 1200}),
                json!({"status": "Pending", "total_amount": 450}),
            ],
        );
        Arc::new(store)
    }

    fn pipeline_with(responses: Vec<Result<String, LlmError>>) -> Pipeline {
        let backend = Arc::new(FakeGeneration::new(responses));
        let router = Arc::new(LlmRouter::new(
            backend,
            vec!["primary".into()],
            BackoffConfig {
                base_ms: 1,
                max_ms: 2,
                max_attempts: 2,
            },
        ));
        Pipeline::new(
            Planner::new(Some(router), &STOREFRONT),
            Executor::new(seeded_store()),
            Synthesizer::new(None, Duration::from_secs(1)),
            RoleClassifier::new(None, Duration::from_secs(1)),
            &STOREFRONT,
        )
    }

    #[tokio::test]
    async fn empty_question_is_rejected_without_planning() {
        let p = pipeline_with(vec![Ok("should never be called".into())]);
        let reply = p.ask("   ").await;
        assert_eq!(reply.status, 400);
        assert!(!reply.body.ok);
        assert!(reply.body.planner_source.is_none());
    }

    #[tokio::test]
    async fn smalltalk_short_circuits() {
        // Small-talk answers locally.
        let p = pipeline_with(vec![Ok("db.users.find({})".into())]);
        let reply = p.ask("hi").await;
        assert_eq!(reply.status, 200);
        assert!(reply.body.ok);
        assert_eq!(reply.body.planner_source, Some(PlanSource::Smalltalk));
        assert_eq!(reply.body.results, json!([]));
        assert!(reply.body.mongodb_query.is_none());
    }

    #[tokio::test]
    async fn destructive_input_is_blocked() {
        // Destructive intent refuses locally.
        let p = pipeline_with(vec![Ok("db.users.find({})".into())]);
        let reply = p.ask("drop database").await;
        assert_eq!(reply.status, 403);
        assert!(!reply.body.ok);
        assert_eq!(reply.body.planner_source, Some(PlanSource::Blocked));
    }

    #[tokio::test]
    async fn successful_find_round_trip() {
        let p = pipeline_with(vec![Ok(
            "db.products.find({price: {$lt: 1500}}).limit(20)".into()
        )]);
        let reply = p.ask("products under 1500?").await;
        assert_eq!(reply.status, 200);
        assert!(reply.body.ok);
        assert_eq!(reply.body.planner_source, Some(PlanSource::Llm));
        assert_eq!(reply.body.result_count, 2);
        assert!(reply.body.answer.contains("2 products"));
    }

    #[tokio::test]
    async fn offtopic_sentinel_maps_to_400() {
        let p = pipeline_with(vec![Ok("OFFTOPIC".into())]);
        let reply = p.ask("what's the weather like?").await;
        assert_eq!(reply.status, 400);
        assert!(reply.body.error.unwrap().contains("store database"));
    }

    #[tokio::test]
    async fn forbidden_sentinel_maps_to_403() {
        let p = pipeline_with(vec![Ok("FORBIDDEN".into())]);
        let reply = p.ask("change all the prices").await;
        assert_eq!(reply.status, 403);
    }

    #[tokio::test]
    async fn write_method_from_planner_is_rejected_before_execution() {
        // A write method from the planner must die in validation.
        let p = pipeline_with(vec![Ok("db.users.deleteMany({})".into())]);
        let reply = p.ask("who are the users we should purge").await;
        // "purge" is caught locally even before planning; use a softer
        // question to actually reach the validator.
        assert_eq!(reply.status, 403);

        let p = pipeline_with(vec![Ok("db.users.deleteMany({})".into())]);
        let reply = p.ask("list users please").await;
        assert_eq!(reply.status, 403);
        assert!(!reply.body.ok);
        // Raw planner text only appears in the admin-facing detail.
        assert!(reply.body.detail.unwrap().contains("deleteMany"));
        assert_eq!(reply.body.role, AnswerRole::Admin);
        assert!(!reply.body.error.unwrap().contains("deleteMany"));
    }

    #[tokio::test]
    async fn planner_outage_falls_back_and_reports_provenance() {
        // Full outage path: remote planner down, heuristic answers.
        let p = pipeline_with(vec![Err(LlmError::Unavailable(503))]);
        let reply = p.ask("how many products are in stock?").await;
        assert_eq!(reply.status, 200);
        assert!(reply.body.ok);
        assert_eq!(reply.body.planner_source, Some(PlanSource::Fallback));
        assert_eq!(reply.body.result_count, 2);
    }

    #[tokio::test]
    async fn execution_errors_surface_generically() {
        // Unknown collection in the store (schema drift) surfaces as a
        // generic execution failure.
        let p = pipeline_with(vec![Ok("db.reviews.find({})".into())]);
        let reply = p.ask("any reviews?").await;
        assert_eq!(reply.status, 500);
        assert!(!reply.body.ok);
        assert!(reply.body.detail.is_none());
    }
}
