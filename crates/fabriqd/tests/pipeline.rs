//! End-to-end pipeline tests: scripted LLM backend + seeded in-memory
//! store, driven through the orchestrator exactly as the HTTP boundary
//! drives it.

use fabriq_common::llm::{BackoffConfig, FakeGeneration, LlmError, LlmRouter};
use fabriq_common::{AnswerRole, PlanSource};
use fabriqd::executor::Executor;
use fabriqd::orchestrator::Pipeline;
use fabriqd::planner::Planner;
use fabriqd::role::RoleClassifier;
use fabriqd::schema::STOREFRONT;
use fabriqd::store::MemoryStore;
use fabriqd::synthesizer::Synthesizer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert_many(
        "fabrics",
        vec![
            json!({"_id": {"$oid": "64a1b2c3d4e5f60718293a01"}, "fabric_name": "Madras Cotton", "material": "Cotton", "color": "Red"}),
            json!({"_id": {"$oid": "64a1b2c3d4e5f60718293a02"}, "fabric_name": "Banarasi Silk", "material": "Silk", "color": "Blue"}),
        ],
    );
    store.insert_many(
        "products",
        vec![
            json!({"product_name": "Summer Shirt", "price": 899, "stock_quantity": 4,
                   "fabric_id": {"$oid": "64a1b2c3d4e5f60718293a01"}}),
            json!({"product_name": "Party Saree", "price": 2499, "stock_quantity": 2,
                   "fabric_id": {"$oid": "64a1b2c3d4e5f60718293a02"}}),
            json!({"product_name": "Denim Kurta", "price": 1499, "stock_quantity": 0,
                   "fabric_id": {"$oid": "64a1b2c3d4e5f60718293a01"}}),
        ],
    );
    store.insert_many(
        "orders",
        vec![
            json!({"status": "Delivered", "total_amount": 1200,
                   "order_date": {"$date": "2024-06-01T00:00:00+00:00"}}),
            json!({"status": "Delivered", "total_amount": 800,
                   "order_date": {"$date": "2024-06-10T00:00:00+00:00"}}),
            json!({"status": "Pending", "total_amount": 450,
                   "order_date": {"$date": "2024-06-15T00:00:00+00:00"}}),
        ],
    );
    store
}

fn quick_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 1,
        max_ms: 2,
        max_attempts: 2,
    }
}

/// Pipeline with a scripted planner backend and heuristic-only enrichment.
fn pipeline(responses: Vec<Result<String, LlmError>>) -> (Pipeline, Arc<FakeGeneration>) {
    let backend = Arc::new(FakeGeneration::new(responses));
    let router = Arc::new(LlmRouter::new(
        backend.clone(),
        vec!["primary".into(), "fallback-model".into()],
        quick_backoff(),
    ));
    let p = Pipeline::new(
        Planner::new(Some(router), &STOREFRONT),
        Executor::new(Arc::new(seeded_store())),
        Synthesizer::new(None, Duration::from_secs(1)),
        RoleClassifier::new(None, Duration::from_secs(1)),
        &STOREFRONT,
    );
    (p, backend)
}

#[tokio::test]
async fn smalltalk_never_reaches_the_planner() {
    // No remote call, no store call, canned answer.
    let (p, backend) = pipeline(vec![Ok("db.users.find({})".into())]);
    let reply = p.ask("hi").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.planner_source, Some(PlanSource::Smalltalk));
    assert_eq!(reply.body.results, json!([]));
    assert_eq!(reply.body.result_count, 0);
    assert_eq!(reply.body.role, AnswerRole::User);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn destructive_input_refused_before_any_remote_call() {
    // Local refusal; the planner is never consulted.
    let (p, backend) = pipeline(vec![Ok("db.users.find({})".into())]);
    let reply = p.ask("drop database").await;

    assert_eq!(reply.status, 403);
    assert!(!reply.body.ok);
    assert_eq!(reply.body.planner_source, Some(PlanSource::Blocked));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn bounded_find_round_trip() {
    // Parse -> evaluate -> execute; all documents satisfy the filter.
    let (p, _) = pipeline(vec![Ok("db.products.find({price:{$lt:1500}}).limit(20)".into())]);
    let reply = p.ask("which products cost less than 1500?").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.result_count, 2);
    let docs = reply.body.results.as_array().unwrap();
    assert!(docs.iter().all(|d| d["price"].as_i64().unwrap() < 1500));
    assert_eq!(
        reply.body.mongodb_query.as_deref(),
        Some("db.products.find({price:{$lt:1500}}).limit(20)")
    );
}

#[tokio::test]
async fn aggregate_total_synthesizes_total_sentence() {
    // Grand-total pipeline -> scalar shape -> "total" sentence.
    let (p, _) = pipeline(vec![Ok(
        r#"db.orders.aggregate([{$group:{_id:null,total:{$sum:"$total_amount"}}}])"#.into(),
    )]);
    let reply = p.ask("what is the total amount of all orders?").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.result_count, 1);
    assert_eq!(reply.body.results[0]["total"], json!(2450));
    assert!(reply.body.answer.contains("total"));
    assert!(reply.body.answer.contains("2450"));
}

#[tokio::test]
async fn write_method_rejected_before_store_interaction() {
    // deleteMany never executes, regardless of valid grammar.
    let (p, _) = pipeline(vec![Ok("db.users.deleteMany({})".into())]);
    let reply = p.ask("list the users for me").await;

    assert_eq!(reply.status, 403);
    assert!(!reply.body.ok);
    // The public error is generic; the raw plan only rides in detail.
    assert!(!reply.body.error.as_ref().unwrap().contains("deleteMany"));
    assert!(reply.body.detail.as_ref().unwrap().contains("deleteMany"));
    assert_eq!(reply.body.role, AnswerRole::Admin);
}

#[tokio::test]
async fn transient_outage_uses_fallback_planner() {
    // Every model exhausts retries, the heuristic plans, provenance
    // says "fallback".
    let (p, backend) = pipeline(vec![Err(LlmError::Unavailable(503))]);
    let reply = p.ask("how many products are in stock?").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.planner_source, Some(PlanSource::Fallback));
    assert_eq!(reply.body.results, json!(2));
    // Two configured models, two attempts each.
    assert_eq!(backend.call_count(), 4);
    assert_eq!(
        backend.models_called(),
        vec!["primary", "primary", "fallback-model", "fallback-model"]
    );
}

#[tokio::test]
async fn sentinel_offtopic_skips_execution() {
    // The sentinel terminates the request before the executor.
    let (p, _) = pipeline(vec![Ok("offtopic".into())]);
    let reply = p.ask("what's the capital of France?").await;

    assert_eq!(reply.status, 400);
    assert!(!reply.body.ok);
    assert_eq!(reply.body.planner_source, Some(PlanSource::Llm));
    assert_eq!(reply.body.result_count, 0);
}

#[tokio::test]
async fn sentinel_forbidden_maps_to_403() {
    let (p, _) = pipeline(vec![Ok("FORBIDDEN".into())]);
    let reply = p.ask("set every price to zero please").await;
    assert_eq!(reply.status, 403);
    assert!(!reply.body.ok);
}

#[tokio::test]
async fn disallowed_collection_rejected() {
    // The collection allow-list is closed.
    let (p, _) = pipeline(vec![Ok("db.apikeys.find({})".into())]);
    let reply = p.ask("show me the api keys").await;
    assert_eq!(reply.status, 403);
    assert!(!reply.body.ok);
}

#[tokio::test]
async fn deny_listed_keyword_anywhere_rejects() {
    // The keyword scan is independent of grammar validity.
    let (p, _) = pipeline(vec![Ok(
        r#"db.products.find({description: {$regex: "drop"}})"#.into()
    )]);
    let reply = p.ask("products whose description mentions that word").await;
    assert_eq!(reply.status, 403);
    assert!(!reply.body.ok);
}

#[tokio::test]
async fn fallback_join_plan_executes_against_fabrics() {
    // The color/material fallback path produces a $lookup pipeline that
    // actually runs.
    let (p, _) = pipeline(vec![Err(LlmError::Unavailable(503))]);
    let reply = p.ask("show red cotton shirts under 1000").await;

    assert!(reply.body.ok, "fallback join failed: {:?}", reply.body.error);
    assert_eq!(reply.body.planner_source, Some(PlanSource::Fallback));
    assert_eq!(reply.body.result_count, 1);
    assert_eq!(
        reply.body.results[0]["product_name"],
        json!("Summer Shirt")
    );
}

#[tokio::test]
async fn grouped_aggregate_renders_ranked_breakdown() {
    let (p, _) = pipeline(vec![Ok(
        r#"db.orders.aggregate([{$group: {_id: "$status", count: {$sum: 1}}}])"#.into(),
    )]);
    let reply = p.ask("orders by status?").await;

    assert!(reply.body.ok);
    assert!(reply.body.answer.contains("Delivered — 2"));
    assert!(reply.body.answer.contains("Pending — 1"));
}

#[tokio::test]
async fn empty_result_suggests_relaxing_filters() {
    let (p, _) = pipeline(vec![Ok("db.products.find({price: {$gt: 90000}})".into())]);
    let reply = p.ask("products above 90000?").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.result_count, 0);
    assert!(reply.body.answer.contains("No results"));
}

#[tokio::test]
async fn malformed_planner_output_is_a_policy_rejection() {
    let (p, _) = pipeline(vec![Ok("SELECT * FROM products".into())]);
    let reply = p.ask("give me everything").await;

    assert_eq!(reply.status, 500);
    assert!(!reply.body.ok);
    assert!(reply
        .body
        .error
        .as_ref()
        .unwrap()
        .contains("security policy"));
    assert!(reply.body.detail.as_ref().unwrap().contains("SELECT"));
}

#[tokio::test]
async fn date_filters_execute_against_seeded_orders() {
    let (p, _) = pipeline(vec![Ok(
        r#"db.orders.find({order_date: {$gte: ISODate("2024-06-05")}})"#.into(),
    )]);
    let reply = p.ask("orders after june 5th?").await;

    assert!(reply.body.ok);
    assert_eq!(reply.body.result_count, 2);
}

#[tokio::test]
async fn identical_queries_are_idempotent() {
    // Read-only idempotence, observed end to end.
    let script = || vec![Ok("db.products.find({stock_quantity: {$gt: 0}})".to_string())];
    let (p1, _) = pipeline(script());
    let (p2, _) = pipeline(script());
    let a = p1.ask("in-stock products?").await;
    let b = p2.ask("in-stock products?").await;

    assert_eq!(a.body.result_count, b.body.result_count);
    assert_eq!(a.body.results, b.body.results);
}
