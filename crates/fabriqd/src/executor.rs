//! Query executor - the only place a validated query touches the store.

use crate::query::{PlannedQuery, QueryMethod};
use crate::store::{DocumentStore, StoreError};
use fabriq_common::AskError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Result cap applied when the planner did not ask for a narrower one.
pub const DEFAULT_FIND_LIMIT: u64 = 20;

/// Raw result of one executed query.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Count(u64),
    Documents(Vec<Value>),
}

impl ResultSet {
    pub fn result_count(&self) -> u64 {
        match self {
            ResultSet::Count(n) => *n,
            ResultSet::Documents(docs) => docs.len() as u64,
        }
    }

    /// The `results` payload of the response.
    pub fn to_json(&self) -> Value {
        match self {
            ResultSet::Count(n) => json!(n),
            ResultSet::Documents(docs) => Value::Array(docs.clone()),
        }
    }
}

/// Dispatches validated queries to the injected store handle.
pub struct Executor {
    store: Arc<dyn DocumentStore>,
}

impl Executor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        planned: &PlannedQuery,
        args: &[Value],
    ) -> Result<ResultSet, AskError> {
        debug!(
            collection = %planned.collection,
            method = planned.method.as_str(),
            "executing query"
        );

        match planned.method {
            QueryMethod::Find => {
                let filter = object_arg(args.first(), "find filter")?;
                let projection = match args.get(1) {
                    Some(p) => {
                        if !p.is_object() {
                            return Err(AskError::ArgumentSyntax(
                                "find projection must be an object".to_string(),
                            ));
                        }
                        Some(p)
                    }
                    None => None,
                };
                let limit = planned
                    .limit
                    .map(|n| n.min(DEFAULT_FIND_LIMIT))
                    .unwrap_or(DEFAULT_FIND_LIMIT);

                let docs = self
                    .store
                    .find(&planned.collection, &filter, projection, limit as usize)
                    .await
                    .map_err(map_store_error)?;
                Ok(ResultSet::Documents(docs))
            }
            QueryMethod::CountDocuments => {
                let filter = object_arg(args.first(), "countDocuments filter")?;
                let n = self
                    .store
                    .count_documents(&planned.collection, &filter)
                    .await
                    .map_err(map_store_error)?;
                Ok(ResultSet::Count(n))
            }
            QueryMethod::Aggregate => {
                let stages = match args.first() {
                    Some(Value::Array(stages)) => stages.clone(),
                    Some(_) => {
                        return Err(AskError::ArgumentSyntax(
                            "aggregate expects a pipeline array".to_string(),
                        ))
                    }
                    None => Vec::new(),
                };
                let rows = self
                    .store
                    .aggregate(&planned.collection, &stages)
                    .await
                    .map_err(map_store_error)?;
                Ok(ResultSet::Documents(rows))
            }
        }
    }
}

/// Missing filter defaults to match-all; a present non-object is rejected.
fn object_arg(arg: Option<&Value>, what: &str) -> Result<Value, AskError> {
    match arg {
        None => Ok(json!({})),
        Some(v) if v.is_object() => Ok(v.clone()),
        Some(_) => Err(AskError::ArgumentSyntax(format!(
            "{} must be an object",
            what
        ))),
    }
}

fn map_store_error(e: StoreError) -> AskError {
    match e {
        StoreError::Unavailable(_) => AskError::StoreUnavailable,
        other => AskError::Execution(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query;
    use crate::schema::STOREFRONT;
    use crate::store::MemoryStore;

    fn executor() -> Executor {
        let mut store = MemoryStore::new();
        store.insert_many(
            "products",
            (0..30)
                .map(|i| {
                    json!({
                        "product_name": format!("Product {}", i),
                        "price": 100 * i,
                        "stock_quantity": i % 5
                    })
                })
                .collect(),
        );
        store.insert_many(
            "orders",
            vec![
                json!({"status": "Delivered", "total_amount": 1500}),
                json!({"status": "Pending", "total_amount": 700}),
            ],
        );
        Executor::new(Arc::new(store))
    }

    #[tokio::test]
    async fn find_applies_default_cap() {
        let exec = executor();
        let planned = query::parse("db.products.find({})", &STOREFRONT).unwrap();
        let args = crate::args::evaluate(&planned.args_text).unwrap();
        let result = exec.execute(&planned, &args).await.unwrap();
        assert_eq!(result.result_count(), DEFAULT_FIND_LIMIT);
    }

    #[tokio::test]
    async fn find_honors_narrower_limit_but_caps_wider_ones() {
        let exec = executor();
        let planned = query::parse("db.products.find({}).limit(5)", &STOREFRONT).unwrap();
        let result = exec.execute(&planned, &[json!({})]).await.unwrap();
        assert_eq!(result.result_count(), 5);

        let planned = query::parse("db.products.find({}).limit(500)", &STOREFRONT).unwrap();
        let result = exec.execute(&planned, &[json!({})]).await.unwrap();
        assert_eq!(result.result_count(), DEFAULT_FIND_LIMIT);
    }

    #[tokio::test]
    async fn find_filter_applies() {
        // A bounded find returns only matching documents.
        let exec = executor();
        let planned =
            query::parse("db.products.find({price: {$lt: 1500}}).limit(20)", &STOREFRONT).unwrap();
        let args = crate::args::evaluate(&planned.args_text).unwrap();
        let result = exec.execute(&planned, &args).await.unwrap();
        match result {
            ResultSet::Documents(docs) => {
                assert!(docs.len() <= 20);
                assert!(docs
                    .iter()
                    .all(|d| d["price"].as_i64().unwrap() < 1500));
            }
            other => panic!("expected documents, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn count_returns_scalar() {
        let exec = executor();
        let planned = query::parse("db.orders.countDocuments({})", &STOREFRONT).unwrap();
        let result = exec.execute(&planned, &[json!({})]).await.unwrap();
        assert_eq!(result, ResultSet::Count(2));
        assert_eq!(result.to_json(), json!(2));
    }

    #[tokio::test]
    async fn aggregate_requires_array_argument() {
        let exec = executor();
        let planned = query::parse("db.orders.aggregate({})", &STOREFRONT).unwrap();
        let err = exec.execute(&planned, &[json!({})]).await.unwrap_err();
        assert!(matches!(err, AskError::ArgumentSyntax(_)));
    }

    #[tokio::test]
    async fn aggregate_groups() {
        // A grand-total pipeline yields one row with the sum.
        let exec = executor();
        let planned = query::parse(
            r#"db.orders.aggregate([{$group: {_id: null, total: {$sum: "$total_amount"}}}])"#,
            &STOREFRONT,
        )
        .unwrap();
        let args = crate::args::evaluate(&planned.args_text).unwrap();
        let result = exec.execute(&planned, &args).await.unwrap();
        match result {
            ResultSet::Documents(rows) => {
                assert_eq!(rows, vec![json!({"_id": null, "total": 2200})]);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_object_filter_rejected() {
        let exec = executor();
        let planned = query::parse("db.products.find(5)", &STOREFRONT).unwrap();
        let err = exec.execute(&planned, &[json!(5)]).await.unwrap_err();
        assert!(matches!(err, AskError::ArgumentSyntax(_)));
    }
}
