//! Answer synthesizer - turns a raw result set into a natural-language
//! answer.
//!
//! Shape detection runs in priority order: scalar, grouped aggregate,
//! entity list. The optional LLM phrasing pass is best-effort only; the
//! heuristic rendering is always computed first and is the answer of
//! record whenever the remote call fails, times out or is disabled.

use crate::executor::ResultSet;
use fabriq_common::llm::LlmRouter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Metric fields a grouped-aggregate row may carry, in detection order.
const METRIC_FIELDS: &[&str] = &["value", "total", "count", "sum", "avg", "min", "max"];

/// Fields worth showing when rendering an entity bullet.
const NAME_FIELDS: &[&str] = &["product_name", "fabric_name", "username", "reviewText"];

const PREVIEW_LIMIT: usize = 5;

pub struct Synthesizer {
    router: Option<Arc<LlmRouter>>,
    timeout: Duration,
}

impl Synthesizer {
    /// `router: None` disables the phrasing pass entirely.
    pub fn new(router: Option<Arc<LlmRouter>>, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    pub async fn synthesize(&self, question: &str, query_text: &str, result: &ResultSet) -> String {
        let heuristic = heuristic_answer(question, result);

        if let Some(router) = &self.router {
            let prompt = phrasing_prompt(question, query_text, result);
            match tokio::time::timeout(self.timeout, router.generate(&prompt)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(Ok(_)) | Ok(Err(_)) => {
                    debug!("phrasing pass failed, keeping heuristic answer");
                }
                Err(_) => {
                    debug!("phrasing pass timed out, keeping heuristic answer");
                }
            }
        }

        heuristic
    }
}

fn phrasing_prompt(question: &str, query_text: &str, result: &ResultSet) -> String {
    let mut results_json = result.to_json().to_string();
    if results_json.len() > 2_000 {
        results_json.truncate(2_000);
        results_json.push_str("...");
    }
    format!(
        "A user asked: \"{question}\"\n\
         This read-only database query answered it: {query_text}\n\
         Raw JSON result: {results_json}\n\n\
         Write a short, friendly answer (1-3 sentences) summarizing the \
         result for the user. Plain text only, no markdown, no JSON."
    )
}

/// Deterministic rendering; the ground truth the LLM pass can only dress up.
pub fn heuristic_answer(question: &str, result: &ResultSet) -> String {
    if let Some(n) = scalar_value(result) {
        return scalar_sentence(question, n);
    }

    let ResultSet::Documents(docs) = result else {
        // Count results always took the scalar branch above.
        unreachable!("non-scalar count");
    };

    if let Some(rows) = grouped_rows(docs) {
        return grouped_answer(rows);
    }

    entity_answer(question, docs)
}

/// Scalar detection: a bare count, a one-element numeric list, or a single
/// row exposing a count/total/value style field.
fn scalar_value(result: &ResultSet) -> Option<f64> {
    match result {
        ResultSet::Count(n) => Some(*n as f64),
        ResultSet::Documents(docs) => {
            if docs.len() != 1 {
                return None;
            }
            match &docs[0] {
                Value::Number(n) => n.as_f64(),
                Value::Object(row) => METRIC_FIELDS
                    .iter()
                    .filter_map(|f| row.get(*f))
                    .find_map(|v| v.as_f64())
                    // Only treat the row as scalar when it carries nothing
                    // but the metric (plus a grouping key).
                    .filter(|_| {
                        row.keys().all(|k| {
                            k == "_id" || METRIC_FIELDS.contains(&k.as_str())
                        })
                    }),
                _ => None,
            }
        }
    }
}

fn scalar_sentence(question: &str, n: f64) -> String {
    let q = question.to_lowercase();
    let noun = entity_noun(&q);
    let value = format_number(n);

    if q.contains("how many") || q.contains("count") || q.contains("number of") {
        if n == 1.0 {
            format!("There is 1 {} matching your question.", noun)
        } else {
            format!("There are {} {}s matching your question.", value, noun)
        }
    } else if q.contains("average") || q.contains("avg") {
        format!("The average comes to {}.", value)
    } else if q.contains("total") || q.contains("sum") || q.contains("revenue") {
        format!("The total comes to {}.", value)
    } else if q.contains("min") || q.contains("lowest") || q.contains("cheapest") {
        format!("The minimum is {}.", value)
    } else if q.contains("max") || q.contains("highest") || q.contains("most expensive") {
        format!("The maximum is {}.", value)
    } else {
        format!("Result: {}", value)
    }
}

/// Grouped-aggregate detection: every row is an object with `_id` plus a
/// numeric metric field.
fn grouped_rows(docs: &[Value]) -> Option<Vec<(&Value, &'static str, f64)>> {
    if docs.is_empty() {
        return None;
    }
    docs.iter()
        .map(|doc| {
            let row = doc.as_object()?;
            let id = row.get("_id")?;
            let (field, value) = METRIC_FIELDS
                .iter()
                .find_map(|f| row.get(*f).and_then(|v| v.as_f64()).map(|v| (*f, v)))?;
            Some((id, field, value))
        })
        .collect()
}

fn grouped_answer(mut rows: Vec<(&Value, &'static str, f64)>) -> String {
    rows.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let total = rows.len();
    let mut lines = vec!["Here's the breakdown:".to_string()];
    for (id, _, value) in rows.iter().take(PREVIEW_LIMIT) {
        lines.push(format!("• {} — {}", group_key(id), format_number(*value)));
    }
    if total > PREVIEW_LIMIT {
        lines.push(format!("…and {} more", total - PREVIEW_LIMIT));
    }
    lines.join("\n")
}

fn group_key(id: &Value) -> String {
    match id {
        Value::Null => "(all)".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => map
            .get("$oid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| id.to_string()),
        other => other.to_string(),
    }
}

fn entity_answer(question: &str, docs: &[Value]) -> String {
    if docs.is_empty() {
        return "No results matched your question. Try relaxing the filters - \
                a wider price range or fewer conditions."
            .to_string();
    }

    let q = question.to_lowercase();
    let noun = entity_noun(&q);
    let total = docs.len();

    let mut lines = vec![if total == 1 {
        format!("I found 1 {}:", noun)
    } else {
        format!("I found {} {}s:", total, noun)
    }];

    for doc in docs.iter().take(PREVIEW_LIMIT) {
        lines.push(format!("• {}", entity_line(doc)));
    }
    if total > PREVIEW_LIMIT {
        lines.push(format!("…and {} more", total - PREVIEW_LIMIT));
    }
    lines.join("\n")
}

/// One bullet combining whichever known fields the document carries.
fn entity_line(doc: &Value) -> String {
    let Some(obj) = doc.as_object() else {
        return doc.to_string();
    };

    let mut parts: Vec<String> = Vec::new();

    if let Some(name) = NAME_FIELDS.iter().find_map(|f| obj.get(*f).and_then(|v| v.as_str())) {
        parts.push(truncate(name, 60));
    }
    if let Some(price) = obj.get("price").and_then(|v| v.as_f64()) {
        parts.push(format!("price {}", format_number(price)));
    }
    if let Some(stock) = obj.get("stock_quantity").and_then(|v| v.as_f64()) {
        parts.push(format!("stock {}", format_number(stock)));
    }
    if let Some(rating) = obj.get("rating").and_then(|v| v.as_f64()) {
        parts.push(format!("rating {}", format_number(rating)));
    }
    for field in ["color", "material", "status"] {
        if let Some(v) = obj.get(field).and_then(|v| v.as_str()) {
            parts.push(v.to_string());
        }
    }
    if let Some(amount) = obj.get("total_amount").and_then(|v| v.as_f64()) {
        parts.push(format!("total {}", format_number(amount)));
    }
    if let Some(date) = obj
        .get("order_date")
        .map(|v| match v {
            Value::Object(m) => m.get("$date").cloned().unwrap_or(Value::Null),
            other => other.clone(),
        })
        .and_then(|v| v.as_str().map(|s| s.to_string()))
    {
        parts.push(truncate(&date, 10));
    }

    if parts.is_empty() {
        truncate(&doc.to_string(), 80)
    } else {
        parts.join(" — ")
    }
}

fn entity_noun(q: &str) -> &'static str {
    if q.contains("product") {
        "product"
    } else if q.contains("order") {
        "order"
    } else if q.contains("review") || q.contains("rating") {
        "review"
    } else if q.contains("user") || q.contains("customer") {
        "user"
    } else if q.contains("fabric") {
        "fabric"
    } else {
        "item"
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{:.2}", n)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabriq_common::llm::{BackoffConfig, FakeGeneration, LlmError};
    use serde_json::json;

    #[test]
    fn count_shape_yields_count_sentence() {
        let answer = heuristic_answer("how many products are in stock?", &ResultSet::Count(42));
        assert_eq!(answer, "There are 42 products matching your question.");
    }

    #[test]
    fn singular_count() {
        let answer = heuristic_answer("how many orders today", &ResultSet::Count(1));
        assert_eq!(answer, "There is 1 order matching your question.");
    }

    #[test]
    fn total_row_yields_total_sentence() {
        // One grouped row with a `total` field, question says
        // "total" - scalar shape wins over the grouped rendering.
        let result = ResultSet::Documents(vec![json!({"_id": null, "total": 2750})]);
        let answer = heuristic_answer("what is the total revenue?", &result);
        assert_eq!(answer, "The total comes to 2750.");
    }

    #[test]
    fn average_sentence_formats_decimals() {
        let result = ResultSet::Documents(vec![json!({"_id": null, "avg": 687.5})]);
        let answer = heuristic_answer("average order value?", &result);
        assert_eq!(answer, "The average comes to 687.50.");
    }

    #[test]
    fn scalar_without_keyword_is_generic() {
        let answer = heuristic_answer("and the result is?", &ResultSet::Count(7));
        assert_eq!(answer, "Result: 7");
    }

    #[test]
    fn grouped_rows_render_ranked_bullets() {
        let result = ResultSet::Documents(vec![
            json!({"_id": "Pending", "count": 3}),
            json!({"_id": "Delivered", "count": 9}),
            json!({"_id": "Cancelled", "count": 1}),
        ]);
        let answer = heuristic_answer("orders by status", &result);
        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines[1], "• Delivered — 9");
        assert_eq!(lines[2], "• Pending — 3");
        assert_eq!(lines[3], "• Cancelled — 1");
    }

    #[test]
    fn grouped_rows_cap_at_five_with_trailer() {
        let rows: Vec<Value> = (0..8)
            .map(|i| json!({"_id": format!("g{}", i), "count": i}))
            .collect();
        let answer = heuristic_answer("breakdown", &ResultSet::Documents(rows));
        assert!(answer.contains("…and 3 more"));
        assert_eq!(answer.lines().count(), 7); // header + 5 bullets + trailer
    }

    #[test]
    fn empty_list_suggests_relaxing_filters() {
        let answer = heuristic_answer("red silk towels?", &ResultSet::Documents(vec![]));
        assert!(answer.contains("No results"));
        assert!(answer.contains("relaxing"));
    }

    #[test]
    fn entity_list_combines_known_fields() {
        let result = ResultSet::Documents(vec![
            json!({"product_name": "Denim Kurta", "price": 1499, "stock_quantity": 12}),
            json!({"product_name": "Silk Saree", "price": 2499, "stock_quantity": 0}),
        ]);
        let answer = heuristic_answer("show me products", &result);
        assert!(answer.starts_with("I found 2 products:"));
        assert!(answer.contains("• Denim Kurta — price 1499 — stock 12"));
    }

    #[test]
    fn entity_list_caps_at_five() {
        let docs: Vec<Value> = (0..12)
            .map(|i| json!({"product_name": format!("P{}", i), "price": i}))
            .collect();
        let answer = heuristic_answer("products?", &ResultSet::Documents(docs));
        assert!(answer.contains("…and 7 more"));
    }

    #[test]
    fn entity_noun_follows_question() {
        let docs = vec![json!({"username": "meera"})];
        let answer = heuristic_answer("which users signed up?", &ResultSet::Documents(docs));
        assert!(answer.contains("1 user"));
    }

    #[tokio::test]
    async fn phrasing_pass_replaces_heuristic_when_it_works() {
        let backend = Arc::new(FakeGeneration::always("There are plenty of products."));
        let router = LlmRouter::new(
            backend,
            vec!["m".into()],
            BackoffConfig {
                base_ms: 1,
                max_ms: 2,
                max_attempts: 1,
            },
        );
        let synth = Synthesizer::new(Some(Arc::new(router)), Duration::from_secs(2));
        let answer = synth
            .synthesize("how many products?", "db.products.countDocuments({})", &ResultSet::Count(30))
            .await;
        assert_eq!(answer, "There are plenty of products.");
    }

    #[tokio::test]
    async fn phrasing_pass_failure_degrades_to_heuristic() {
        let backend = Arc::new(FakeGeneration::always_error(LlmError::Unavailable(503)));
        let router = LlmRouter::new(
            backend,
            vec!["m".into()],
            BackoffConfig {
                base_ms: 1,
                max_ms: 2,
                max_attempts: 1,
            },
        );
        let synth = Synthesizer::new(Some(Arc::new(router)), Duration::from_secs(2));
        let answer = synth
            .synthesize("how many products?", "db.products.countDocuments({})", &ResultSet::Count(30))
            .await;
        assert_eq!(answer, "There are 30 products matching your question.");
    }

    #[tokio::test]
    async fn disabled_phrasing_uses_heuristic() {
        let synth = Synthesizer::new(None, Duration::from_secs(1));
        let answer = synth
            .synthesize("count orders", "db.orders.countDocuments({})", &ResultSet::Count(2))
            .await;
        assert_eq!(answer, "There are 2 orders matching your question.");
    }
}
