//! Query parser and validator.
//!
//! Accepts exactly `db.<collection>.<method>(<args>)`, with an optional
//! `.limit(n)` suffix on find and an optional trailing semicolon. The
//! deny-list scan runs over the whole raw text first - a banned keyword
//! anywhere (string literals included) rejects the query outright, even
//! when the grammar would otherwise accept it.

use crate::schema::SchemaDescriptor;
use fabriq_common::AskError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Write-like keywords that must never appear in a query, plus the
/// server-side-execution operators that would smuggle code into the store.
pub const DENY_LIST: &[&str] = &[
    "delete",
    "remove",
    "drop",
    "update",
    "insert",
    "create",
    "replace",
    "rename",
    "truncate",
    "runcommand",
    "mapreduce",
    "findandmodify",
    "bulkwrite",
    "$where",
    "$function",
    "$accumulator",
];

/// The only three dispatchable read methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    Find,
    CountDocuments,
    Aggregate,
}

impl QueryMethod {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "find" => Some(Self::Find),
            "countDocuments" => Some(Self::CountDocuments),
            "aggregate" => Some(Self::Aggregate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::CountDocuments => "countDocuments",
            Self::Aggregate => "aggregate",
        }
    }
}

/// A validated (collection, method, raw-arguments) triple. The argument
/// text is still opaque here; the evaluator owns it.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub collection: String,
    pub method: QueryMethod,
    pub args_text: String,
    pub limit: Option<u64>,
    pub raw: String,
}

static LIMIT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.limit\(\s*(\d+)\s*\)\s*;?\s*$").expect("limit pattern"));

static QUERY_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*db\.([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\((.*)\)\s*;?\s*$")
        .expect("query pattern")
});

/// Parse and validate one raw planner output line.
pub fn parse(raw: &str, schema: &SchemaDescriptor) -> Result<PlannedQuery, AskError> {
    // Deny-list first: cheapest check, and it must hold regardless of
    // whether the grammar matches.
    let lowered = raw.to_lowercase();
    for keyword in DENY_LIST {
        if lowered.contains(keyword) {
            return Err(AskError::ForbiddenOperation((*keyword).to_string()));
        }
    }

    // Peel the optional `.limit(n)` suffix before the main grammar match.
    let (body, limit) = match LIMIT_SUFFIX.captures(raw) {
        Some(caps) => {
            let n: u64 = caps[1]
                .parse()
                .map_err(|_| AskError::MalformedQuery("limit is not a number".to_string()))?;
            let end = caps.get(0).expect("whole match").start();
            (&raw[..end], Some(n))
        }
        None => (raw, None),
    };

    let caps = QUERY_SHAPE.captures(body).ok_or_else(|| {
        AskError::MalformedQuery(
            "expected db.<collection>.<method>(<args>)".to_string(),
        )
    })?;

    let collection = caps[1].to_string();
    let method_name = caps[2].to_string();
    let args_text = caps[3].trim().to_string();

    if !schema.allows_collection(&collection) {
        return Err(AskError::DisallowedCollection(collection));
    }

    let method = QueryMethod::parse(&method_name)
        .ok_or(AskError::DisallowedMethod(method_name))?;

    if limit.is_some() && method != QueryMethod::Find {
        return Err(AskError::MalformedQuery(
            ".limit() is only valid on find".to_string(),
        ));
    }

    Ok(PlannedQuery {
        collection,
        method,
        args_text,
        limit,
        raw: raw.trim().to_string(),
    })
}
