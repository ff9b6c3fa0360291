use std::fmt;

use serde::{Deserialize, Serialize};

/// Token pair returned by the platform token endpoint (password or refresh grant)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: i64,
    pub user_id: String,
    pub display_name: String,
}

/// The single active credential set for this process.
///
/// Expiry is never stored as an absolute time: it is always derived from
/// `issued_at + ttl` so that a persisted snapshot survives clock drift
/// between save and restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub user_id: String,
    pub display_name: String,
    /// Unix epoch seconds at which the current token pair was issued
    pub issued_at: i64,
    pub auto_login: bool,
    /// Login/password are retained only when the user opted into persistence;
    /// they back the password re-auth fallback of the renewal chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn from_bundle(bundle: TokenBundle, issued_at: i64) -> Self {
        Self {
            access_token: bundle.access_token,
            refresh_token: bundle.refresh_token,
            token_type: bundle.token_type,
            expires_in: bundle.expires_in,
            refresh_expires_in: bundle.refresh_expires_in,
            user_id: bundle.user_id,
            display_name: bundle.display_name,
            issued_at,
            auto_login: false,
            login: None,
            password: None,
        }
    }

    /// Seconds of access-token validity left, per the issuance timestamp
    pub fn access_remaining_secs(&self, now: i64) -> i64 {
        self.issued_at + self.expires_in - now
    }

    /// Seconds of refresh-token validity left, per the issuance timestamp
    pub fn refresh_remaining_secs(&self, now: i64) -> i64 {
        self.issued_at + self.refresh_expires_in - now
    }
}

/// Unit pricing for a catalog item in its storefront region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTag {
    pub price: i64,
    pub discounted_price: i64,
    pub currency_code: String,
}

/// One storefront catalog entry. Immutable once fetched; the whole catalog
/// is replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub sku: String,
    pub name: String,
    pub category_path: String,
    pub region: String,
    pub language: String,
    pub purchasable: bool,
    pub listable: bool,
    /// Redemption multiplier: how many units one purchase grants (coin bundles)
    pub use_count: i64,
    pub pricing: Option<PriceTag>,
}

impl CatalogItem {
    /// Derived asset-family key: the third `_`-separated SKU segment
    /// (e.g. `pd3_preplanning_branchbank_1` -> `branchbank`).
    pub fn family_key(&self) -> Option<&str> {
        self.sku.split('_').nth(2)
    }

    pub fn is_orderable(&self) -> bool {
        self.purchasable && self.listable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub currency_code: String,
    pub balance: i64,
}

/// Catalog entries sharing a derived SKU key, in first-encounter order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFamily {
    pub key: String,
    pub display_name: String,
    pub items: Vec<CatalogItem>,
}

/// Rule converting a user-entered amount into line-item quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyPolicy {
    /// The amount is the quantity, applied to every selected item
    ByQuantity(u32),
    /// The amount is a spending cap in the item's currency; quantity is derived
    ByBudget(i64),
}

/// One cart entry at a resolved quantity and price. Totals are derived at
/// add-time; later catalog refreshes do not retroactively update lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub item_id: String,
    pub quantity: u32,
    /// Line total at full price
    pub price: i64,
    /// Line total at discounted price
    pub discounted_price: i64,
    pub currency_code: String,
    pub region: String,
    pub language: String,
    pub display_name: String,
    pub family_name: String,
}

impl CartLine {
    pub fn unit_price(&self) -> i64 {
        if self.quantity == 0 {
            0
        } else {
            self.price / i64::from(self.quantity)
        }
    }
}

/// The exact payload submitted to the order endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDraft {
    pub item_id: String,
    pub quantity: u32,
    pub price: i64,
    pub discounted_price: i64,
    pub currency_code: String,
    pub region: String,
    pub language: String,
    pub return_url: String,
}

impl OrderDraft {
    pub fn from_line(line: &CartLine, return_url: &str) -> Self {
        Self {
            item_id: line.item_id.clone(),
            quantity: line.quantity,
            price: line.price,
            discounted_price: line.discounted_price,
            currency_code: line.currency_code.clone(),
            region: line.region.clone(),
            language: line.language.clone(),
            return_url: return_url.to_string(),
        }
    }
}

/// Server-side order record, created once per submitted line, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderReceipt {
    pub order_no: String,
    pub status: OrderStatus,
    pub price: i64,
    pub tax: i64,
    pub vat: i64,
    pub sales_tax: i64,
    pub payment_provider_fee: i64,
    pub payment_method_fee: i64,
    pub currency_code: String,
    /// Decimal places of the currency, for display formatting
    pub currency_decimals: u32,
    pub payment_station_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Fulfilled,
    Pending,
    Other,
}

impl OrderStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "FULFILLED" => Self::Fulfilled,
            "PENDING" => Self::Pending,
            _ => Self::Other,
        }
    }
}

/// Outcome recorded for one submitted cart line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Fulfilled,
    /// Server accepted the order but did not immediately fulfil it
    /// (e.g. requires external payment); may carry a payment-station URL
    Accepted(Option<String>),
    Failed(String),
}

impl OrderOutcome {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled)
    }
}

impl fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Accepted(_) => write!(f, "accepted, awaiting payment"),
            Self::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}
