use serde::{Deserialize, Serialize};

/// Lifecycle of an order. Transitions are monotonic
/// (pending → paid → fulfilled) except `Refunded`, which is terminal
/// from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Fulfilled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Fulfilled => "fulfilled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "fulfilled" => Ok(Self::Fulfilled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Variant kind of a purchased line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Digital,
    Print,
    Original,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Digital => "digital",
            Self::Print => "print",
            Self::Original => "original",
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digital" => Ok(Self::Digital),
            "print" => Ok(Self::Print),
            "original" => Ok(Self::Original),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Buyer identity attached to an order: a registered user or an anonymous
/// guest. Exactly one of the two is set on the order row until a guest
/// order is claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buyer {
    User(String),
    Guest(String),
}

impl Buyer {
    /// Prefer the user identity when the session metadata carries both.
    pub fn from_parts(user_id: Option<String>, guest_id: Option<String>) -> Option<Self> {
        match (user_id, guest_id) {
            (Some(u), _) => Some(Self::User(u)),
            (None, Some(g)) => Some(Self::Guest(g)),
            (None, None) => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Guest(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Payment session this order was materialized from. Unique: one order
    /// per session, no matter how often the completion event is delivered.
    pub session_id: String,
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: String,
    pub placed_at: i64,
    /// Salted hash of the outstanding claim token. The raw secret is never
    /// stored.
    #[serde(skip_serializing)]
    pub claim_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub claim_token_expires_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub session_id: String,
    pub buyer: Buyer,
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub kind: ItemKind,
    pub quantity: i64,
    pub price_cents: i64,
    /// Licensing text snapshot captured when the item was created, so later
    /// catalog changes never alter already-sold rights.
    pub license: Option<String>,
    /// Set when the line referenced a product/variant/asset that could not
    /// be resolved; flagged for manual reconciliation, never retried.
    pub needs_review: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateOrderItem {
    pub order_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub kind: ItemKind,
    pub quantity: i64,
    pub price_cents: i64,
    pub license: Option<String>,
    pub needs_review: bool,
}
