//! The storefront schema descriptor.
//!
//! Single source of truth for what the planner is told about the store and
//! what the validator will accept. The prompt text and the collection
//! allow-list are both derived from here, so they cannot drift apart.

use once_cell::sync::Lazy;

/// One field of a collection as the planner sees it.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: &'static str,
    pub nullable: bool,
}

/// One queryable collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

/// The full descriptor handed to the planner and the validator.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    collections: Vec<CollectionSpec>,
}

const fn field(name: &'static str, field_type: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        nullable: false,
    }
}

const fn nullable(name: &'static str, field_type: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        nullable: true,
    }
}

const USERS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("fullname", "Object"),
    field("username", "String"),
    field("email", "String"),
    field("role", "String"),
];

const FABRICS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("fabric_name", "String"),
    field("material", "String"),
    field("color", "String"),
];

const PRODUCTS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("product_name", "String"),
    field("description", "String"),
    field("price", "Number"),
    field("stock_quantity", "Number"),
    field("fabric_id", "ObjectId"),
];

const CARTS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("userId", "ObjectId"),
    field("items", "Array of Objects"),
];

const ORDERS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("user_id", "ObjectId"),
    field("orderItems", "Array of Objects"),
    field("total_amount", "Number"),
    field("status", "String: Pending | Shipped | Delivered | Cancelled"),
    field("order_date", "Date"),
];

const REVIEWS: &[FieldSpec] = &[
    field("_id", "ObjectId"),
    field("reviewText", "String"),
    field("rating", "Number: 1-5"),
    field("product_id", "ObjectId"),
    nullable("user_id", "ObjectId"),
];

/// The live storefront schema.
pub static STOREFRONT: Lazy<SchemaDescriptor> = Lazy::new(|| SchemaDescriptor {
    collections: vec![
        CollectionSpec {
            name: "users",
            description: "Registered users of the store.",
            fields: USERS,
        },
        CollectionSpec {
            name: "fabrics",
            description: "Fabric types products are made from.",
            fields: FABRICS,
        },
        CollectionSpec {
            name: "products",
            description: "Individual products available for sale.",
            fields: PRODUCTS,
        },
        CollectionSpec {
            name: "carts",
            description: "Per-user shopping carts.",
            fields: CARTS,
        },
        CollectionSpec {
            name: "orders",
            description: "Completed orders with their line items.",
            fields: ORDERS,
        },
        CollectionSpec {
            name: "reviews",
            description: "Product reviews with star ratings.",
            fields: REVIEWS,
        },
    ],
});

impl SchemaDescriptor {
    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    pub fn allows_collection(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c.name == name)
    }

    pub fn collection_names(&self) -> Vec<&'static str> {
        self.collections.iter().map(|c| c.name).collect()
    }

    /// Render the schema as the human-readable block embedded in the
    /// planner prompt.
    pub fn prompt_block(&self) -> String {
        let mut out = String::from(
            "This database is for an e-commerce application selling fabric-based products.\n\
             Collection names are plural and lowercase.\n",
        );
        for c in &self.collections {
            out.push_str("\n---\n");
            out.push_str(&format!("Collection Name: {}\n", c.name));
            out.push_str(&format!("Description: {}\n", c.description));
            let fields: Vec<String> = c
                .fields
                .iter()
                .map(|f| {
                    if f.nullable {
                        format!("{} (Type: {}, nullable)", f.name, f.field_type)
                    } else {
                        format!("{} (Type: {})", f.name, f.field_type)
                    }
                })
                .collect();
            out.push_str(&format!("Fields: {}\n", fields.join(", ")));
        }
        out
    }
}
