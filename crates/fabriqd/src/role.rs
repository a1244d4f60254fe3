//! Role classifier - decides whether a synthesized answer is safe for an
//! end user or must stay with administrators.
//!
//! The default audience is `user`. Escalation happens when the answer
//! surfaces internals: query text, operator tokens, schema field names,
//! error dumps or account data. When the optional LLM vote is enabled and
//! fails or returns garbage, the classifier errs toward `admin` - showing
//! internal detail to a user is the unsafe direction.

use fabriq_common::llm::LlmRouter;
use fabriq_common::AnswerRole;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Internal-detail markers that force the admin audience.
static SENSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        db\.\w+\.            # literal query text
        | \$(lt|lte|gt|gte|in|nin|regex|group|match|sum|avg|lookup|sort|limit|project|unwind|count|oid|date)\b
        | \b(stack\ trace|panicked|backtrace|traceback)\b
        | \b(config|configuration|api\ key|credential|token)\b
        | \b(stock_quantity|fabric_id|user_id|product_id|total_amount|order_date|reviewText)\b
        | \bObjectId\(
        | [\w.+-]+@[\w-]+\.\w{2,}   # email addresses
        ",
    )
    .expect("sensitive pattern")
});

pub struct RoleClassifier {
    router: Option<Arc<LlmRouter>>,
    timeout: Duration,
}

impl RoleClassifier {
    pub fn new(router: Option<Arc<LlmRouter>>, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    pub async fn classify(&self, answer: &str) -> AnswerRole {
        if let Some(role) = heuristic_role(answer) {
            if role == AnswerRole::Admin {
                // Already restrictive; no remote call can loosen it.
                return AnswerRole::Admin;
            }
            // Heuristic says user-safe; let the LLM vote veto if enabled.
            let Some(router) = &self.router else {
                return AnswerRole::User;
            };
            let prompt = classification_prompt(answer);
            return match tokio::time::timeout(self.timeout, router.generate(&prompt)).await {
                Ok(Ok(text)) => normalize_verdict(&text).unwrap_or_else(|| {
                    debug!("unparseable role verdict, defaulting to admin");
                    AnswerRole::Admin
                }),
                _ => {
                    debug!("role classification call failed, defaulting to admin");
                    AnswerRole::Admin
                }
            };
        }
        AnswerRole::Admin
    }
}

/// Keyword pass. `Some(User)` means confidently clean prose; anything
/// suspicious comes back `Some(Admin)`. Never returns `None` today, but
/// the option keeps the confidence contract explicit.
pub fn heuristic_role(answer: &str) -> Option<AnswerRole> {
    if SENSITIVE.is_match(answer) {
        return Some(AnswerRole::Admin);
    }
    // Raw JSON or code-ish fragments in the answer text read as internals.
    if answer.contains('{') || answer.contains('`') {
        return Some(AnswerRole::Admin);
    }
    Some(AnswerRole::User)
}

fn classification_prompt(answer: &str) -> String {
    format!(
        "You are reviewing an answer produced by a store assistant before it \
         is shown to a shopper.\n\nAnswer:\n\"{answer}\"\n\n\
         If the answer exposes database internals (queries, field names, \
         configuration, errors) or other customers' personal data, reply \
         with the single word ADMIN. Otherwise reply with the single word \
         USER. Reply with exactly one word."
    )
}

fn normalize_verdict(text: &str) -> Option<AnswerRole> {
    let t = text.trim().to_uppercase();
    match t.as_str() {
        "USER" => Some(AnswerRole::User),
        "ADMIN" => Some(AnswerRole::Admin),
        _ => {
            // Tolerate mild prose around the token, but only one of them.
            match (t.contains("USER"), t.contains("ADMIN")) {
                (true, false) => Some(AnswerRole::User),
                (false, true) => Some(AnswerRole::Admin),
                _ => None,
            }
        }
    }
}
