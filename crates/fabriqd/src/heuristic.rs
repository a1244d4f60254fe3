//! Local heuristic planner - the fallback when every remote model fails.
//!
//! Pattern-matches the question shapes the storefront actually sees
//! (category, color/material, price bounds, stock, counts, recent orders)
//! into a safe query. Total by construction: any non-empty input yields a
//! query the parser accepts, down to the empty-filter default.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

const CATEGORIES: &[&str] = &[
    "shirt", "saree", "kurta", "dress", "scarf", "curtain", "bedsheet", "towel", "cushion",
    "dupatta", "stole",
];

const COLORS: &[&str] = &[
    "red", "blue", "green", "black", "white", "yellow", "pink", "purple", "orange", "brown",
    "grey", "gray", "maroon", "navy", "beige", "teal", "golden",
];

const MATERIALS: &[&str] = &[
    "cotton", "silk", "linen", "wool", "polyester", "denim", "velvet", "rayon", "chiffon",
    "jute", "satin", "khadi",
];

static UPPER_BOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:under|below|less than|cheaper than|at most|up to|within)\s*(?:rs\.?|₹|\$)?\s*(\d+(?:\.\d+)?)")
        .expect("upper bound pattern")
});

static LOWER_BOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:over|above|more than|at least|costlier than)\s*(?:rs\.?|₹|\$)?\s*(\d+(?:\.\d+)?)")
        .expect("lower bound pattern")
});

static BETWEEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbetween\s*(?:rs\.?|₹|\$)?\s*(\d+(?:\.\d+)?)\s*and\s*(?:rs\.?|₹|\$)?\s*(\d+(?:\.\d+)?)")
        .expect("between pattern")
});

fn number_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return json!(i);
    }
    text.parse::<f64>().map(|f| json!(f)).unwrap_or(json!(0))
}

/// Price constraints mentioned in the question, as a filter condition.
fn price_condition(q: &str) -> Option<Value> {
    if let Some(caps) = BETWEEN.captures(q) {
        return Some(json!({
            "$gte": number_value(&caps[1]),
            "$lte": number_value(&caps[2])
        }));
    }
    let mut cond = Map::new();
    if let Some(caps) = UPPER_BOUND.captures(q) {
        cond.insert("$lte".to_string(), number_value(&caps[1]));
    }
    if let Some(caps) = LOWER_BOUND.captures(q) {
        cond.insert("$gte".to_string(), number_value(&caps[1]));
    }
    if cond.is_empty() {
        None
    } else {
        Some(Value::Object(cond))
    }
}

fn first_match<'a>(q: &str, vocabulary: &'a [&'a str]) -> Option<&'a str> {
    vocabulary.iter().copied().find(|word| {
        // Whole-word match so "towel" does not fire on "towering".
        Regex::new(&format!(r"\b{}s?\b", word))
            .map(|re| re.is_match(q))
            .unwrap_or(false)
    })
}

fn target_collection(q: &str) -> &'static str {
    if q.contains("order") || q.contains("revenue") || q.contains("sale") {
        "orders"
    } else if q.contains("review") || q.contains("rating") {
        "reviews"
    } else if q.contains("user") || q.contains("customer") {
        "users"
    } else if q.contains("cart") {
        "carts"
    } else if q.contains("fabric") && !q.contains("product") {
        "fabrics"
    } else {
        "products"
    }
}

/// Build a safe query for the question. Never fails, never returns an
/// unparseable string.
pub fn fallback_plan(question: &str) -> String {
    let q = question.to_lowercase();

    let wants_count = q.starts_with("how many") || q.contains("count") || q.contains("number of");
    let collection = target_collection(&q);

    // Product questions mentioning a fabric property need the join.
    let color = first_match(&q, COLORS);
    let material = first_match(&q, MATERIALS);
    if collection == "products" && (color.is_some() || material.is_some()) {
        return lookup_plan(&q, color, material, wants_count);
    }

    let mut filter = Map::new();
    match collection {
        "products" => {
            if let Some(category) = first_match(&q, CATEGORIES) {
                filter.insert(
                    "product_name".to_string(),
                    json!({"$regex": category, "$options": "i"}),
                );
            }
            if let Some(price) = price_condition(&q) {
                filter.insert("price".to_string(), price);
            }
            if q.contains("out of stock") {
                filter.insert("stock_quantity".to_string(), json!({"$lte": 0}));
            } else if q.contains("in stock") || q.contains("available") {
                filter.insert("stock_quantity".to_string(), json!({"$gt": 0}));
            }
        }
        "orders" => {
            for status in ["pending", "shipped", "delivered", "cancelled"] {
                if q.contains(status) {
                    let mut cased = status.to_string();
                    cased[..1].make_ascii_uppercase();
                    filter.insert("status".to_string(), json!(cased));
                    break;
                }
            }
            if q.contains("latest") || q.contains("recent") || q.contains("last") {
                return "db.orders.aggregate([{\"$sort\": {\"order_date\": -1}}, {\"$limit\": 5}])"
                    .to_string();
            }
            if let Some(amount) = price_condition(&q) {
                filter.insert("total_amount".to_string(), amount);
            }
        }
        "reviews" => {
            if let Some(rating) = price_condition(&q) {
                filter.insert("rating".to_string(), rating);
            }
        }
        _ => {}
    }

    let filter_text = Value::Object(filter).to_string();
    if wants_count {
        format!("db.{}.countDocuments({})", collection, filter_text)
    } else {
        format!("db.{}.find({}).limit(20)", collection, filter_text)
    }
}

/// Two-stage plan joining products to their fabric for color/material
/// questions.
fn lookup_plan(
    q: &str,
    color: Option<&str>,
    material: Option<&str>,
    wants_count: bool,
) -> String {
    let mut post_join = Map::new();
    if let Some(color) = color {
        post_join.insert(
            "fabric.color".to_string(),
            json!({"$regex": color, "$options": "i"}),
        );
    }
    if let Some(material) = material {
        post_join.insert(
            "fabric.material".to_string(),
            json!({"$regex": material, "$options": "i"}),
        );
    }
    if let Some(category) = first_match(q, CATEGORIES) {
        post_join.insert(
            "product_name".to_string(),
            json!({"$regex": category, "$options": "i"}),
        );
    }
    if let Some(price) = price_condition(q) {
        post_join.insert("price".to_string(), price);
    }
    if q.contains("in stock") || q.contains("available") {
        post_join.insert("stock_quantity".to_string(), json!({"$gt": 0}));
    }

    let mut stages = vec![
        json!({"$lookup": {
            "from": "fabrics",
            "localField": "fabric_id",
            "foreignField": "_id",
            "as": "fabric"
        }}),
        json!({"$unwind": "$fabric"}),
        json!({"$match": Value::Object(post_join)}),
    ];
    if wants_count {
        stages.push(json!({"$count": "count"}));
    } else {
        stages.push(json!({"$limit": 20}));
    }

    format!("db.products.aggregate({})", Value::Array(stages))
}
