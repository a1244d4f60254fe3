//! Wire types for the ask endpoint.

use serde::{Deserialize, Serialize};

/// Incoming question. The storefront frontend has shipped all three field
/// names at one point or another, so all of them are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    #[serde(alias = "query", alias = "message")]
    pub question: String,
}

/// Where the executed (or refused) plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    /// A remote model produced the query (or a sentinel).
    Llm,
    /// The local heuristic planner produced the query.
    Fallback,
    /// Answered locally, no query planned.
    Smalltalk,
    /// Refused locally, no query planned.
    Blocked,
}

/// Audience the synthesized answer is safe for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerRole {
    User,
    Admin,
}

/// The single terminal response shape. Both success and failure funnel
/// through this; the HTTP status is derived separately from the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub ok: bool,
    pub planner_source: Option<PlanSource>,
    pub mongodb_query: Option<String>,
    pub result_count: u64,
    pub results: serde_json::Value,
    pub answer: String,
    pub role: AnswerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AskResponse {
    /// Success response carrying results and a synthesized answer.
    pub fn success(
        source: PlanSource,
        query: Option<String>,
        result_count: u64,
        results: serde_json::Value,
        answer: String,
        role: AnswerRole,
    ) -> Self {
        Self {
            ok: true,
            planner_source: Some(source),
            mongodb_query: query,
            result_count,
            results,
            answer,
            role,
            error: None,
            detail: None,
        }
    }

    /// Failure response. `detail` carries internals and is meant for
    /// admin-role callers only; the host gates its display.
    pub fn failure(
        source: Option<PlanSource>,
        error: String,
        detail: Option<String>,
        role: AnswerRole,
    ) -> Self {
        Self {
            ok: false,
            planner_source: source,
            mongodb_query: None,
            result_count: 0,
            results: serde_json::Value::Array(vec![]),
            answer: String::new(),
            role,
            error: Some(error),
            detail,
        }
    }
}
