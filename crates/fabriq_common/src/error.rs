//! Error taxonomy for the ask pipeline.
//!
//! Every failure the pipeline can produce maps to exactly one variant, and
//! every variant maps to exactly one HTTP status. Raw planner output never
//! reaches a user-facing message; it travels in the `detail` field only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AskError {
    #[error("a question is required")]
    EmptyInput,

    #[error("destructive request refused")]
    Blocked,

    #[error("the planner declined the question as off-topic")]
    OffTopic,

    #[error("the planner declined the question as forbidden")]
    Forbidden,

    #[error("query planning unavailable: {0}")]
    PlannerUnavailable(String),

    #[error("malformed query expression: {0}")]
    MalformedQuery(String),

    #[error("collection '{0}' is not allowed")]
    DisallowedCollection(String),

    #[error("method '{0}' is not allowed")]
    DisallowedMethod(String),

    #[error("forbidden operation keyword '{0}' in query")]
    ForbiddenOperation(String),

    #[error("invalid query arguments: {0}")]
    ArgumentSyntax(String),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("document store is unavailable")]
    StoreUnavailable,
}

impl AskError {
    /// HTTP status the host boundary should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            AskError::EmptyInput | AskError::OffTopic => 400,
            AskError::Blocked
            | AskError::Forbidden
            | AskError::ForbiddenOperation(_)
            | AskError::DisallowedCollection(_)
            | AskError::DisallowedMethod(_) => 403,
            AskError::PlannerUnavailable(_)
            | AskError::MalformedQuery(_)
            | AskError::ArgumentSyntax(_)
            | AskError::Execution(_)
            | AskError::StoreUnavailable => 500,
        }
    }

    /// Message safe to show any caller. Never echoes planner output.
    pub fn public_message(&self) -> &'static str {
        match self {
            AskError::EmptyInput => "A 'question' is required in the request body.",
            AskError::Blocked => {
                "I can only run read-only queries against the store. \
                 Destructive operations are not allowed."
            }
            AskError::OffTopic => {
                "I can only answer questions about the store database. \
                 Please ask about products, fabrics, orders, users or reviews."
            }
            AskError::Forbidden => "This type of query is not allowed.",
            AskError::PlannerUnavailable(_) => "Query planning is currently unavailable.",
            AskError::MalformedQuery(_)
            | AskError::DisallowedCollection(_)
            | AskError::DisallowedMethod(_)
            | AskError::ForbiddenOperation(_)
            | AskError::ArgumentSyntax(_) => {
                "The generated query was rejected by the security policy."
            }
            AskError::Execution(_) | AskError::StoreUnavailable => {
                "The query could not be executed. Please try again later."
            }
        }
    }

    /// True when the failure means the planner emitted something the
    /// validator or evaluator refused. These carry planner text in their
    /// payload and are the only variants whose detail is admin-restricted.
    pub fn is_planner_rejection(&self) -> bool {
        matches!(
            self,
            AskError::MalformedQuery(_)
                | AskError::DisallowedCollection(_)
                | AskError::DisallowedMethod(_)
                | AskError::ForbiddenOperation(_)
                | AskError::ArgumentSyntax(_)
        )
    }
}
