//! Local intent classifier - decides, before any remote call, whether a
//! question is small-talk (answer locally) or destructive (refuse locally).
//!
//! Pure string matching, deterministic, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

/// Classifier verdict for one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentFlags {
    pub is_smalltalk: bool,
    pub is_destructive: bool,
}

static SMALLTALK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(hi|hii+|hello|hey|yo|good (morning|afternoon|evening)|thanks|thank you|thx|how are you|who are you|what can you do|what are you|help)\b",
    )
    .expect("smalltalk pattern")
});

static DESTRUCTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(drop|truncate|wipe|erase|purge|destroy|delete|remove|insert|update|create|modify|reset)\b",
    )
    .expect("destructive pattern")
});

// "delete my order" style phrases are a storefront request, not an attack
// on the database; the planner answers those with FORBIDDEN instead.
static SCOPED_PERSONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(delete|remove|update|change)\s+(my|this)\b").expect("scoped pattern")
});

/// Classify one raw question.
///
/// Small-talk never sets the destructive flag ("thanks" is safe), but an
/// explicit destructive verb wins even when a greeting is also present.
pub fn classify(text: &str) -> IntentFlags {
    let destructive = DESTRUCTIVE.is_match(text) && !SCOPED_PERSONAL.is_match(text);
    let smalltalk = !destructive && SMALLTALK.is_match(text);

    IntentFlags {
        is_smalltalk: smalltalk,
        is_destructive: destructive,
    }
}

/// Canned reply for small-talk inputs.
pub fn smalltalk_reply() -> &'static str {
    "Hi! I can answer questions about the store catalog - products, fabrics, \
     orders, users and reviews. Try \"how many products are under 1500?\""
}
