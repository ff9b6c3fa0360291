use async_trait::async_trait;

use crate::entities::{CatalogItem, Credentials, OrderDraft, OrderReceipt, TokenBundle, WalletBalance};
use crate::error::Error;

/// OAuth-style token endpoint (password and refresh grants)
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange login/password for a token pair
    async fn password_grant(&self, login: &str, password: &str) -> Result<TokenBundle, Error>;

    /// Exchange a refresh token for a fresh token pair
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenBundle, Error>;
}

/// Post-login storefront operations. Every call carries the session's bearer
/// token and cookie pair; the adapter owns the fixed client-identification
/// headers.
#[async_trait]
pub trait ShopApi: Send + Sync {
    /// Fetch the complete item list with pricing/region metadata
    async fn fetch_catalog(&self, session: &Credentials) -> Result<Vec<CatalogItem>, Error>;

    /// Fetch the wallet for one currency code
    async fn fetch_wallet(
        &self,
        session: &Credentials,
        currency_code: &str,
    ) -> Result<WalletBalance, Error>;

    /// Submit one order; a structured `{code, message}` rejection surfaces as
    /// `Error::Order` with the server message
    async fn submit_order(
        &self,
        session: &Credentials,
        draft: &OrderDraft,
    ) -> Result<OrderReceipt, Error>;
}

/// Opaque credential snapshot at a fixed local path.
/// Absence of the snapshot means "not logged in".
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>, Error>;
    async fn save(&self, credentials: &Credentials) -> Result<(), Error>;
    async fn delete(&self) -> Result<(), Error>;
}

/// Opens a payment-station URL in the user's default browser.
/// Failure is non-fatal and only logged by callers.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), Error>;
}
