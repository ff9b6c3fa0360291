use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::entities::{AssetFamily, CatalogItem, Credentials, WalletBalance};
use crate::error::Error;
use crate::ports::ShopApi;
use crate::session::SharedCredentials;

/// The fixed set of wallet currencies the storefront exposes
pub const WALLET_CURRENCIES: [&str; 3] = ["CASH", "GOLD", "CRED"];

pub const PREPLANNING_CATEGORY: &str = "/PreplanningAssets";
pub const CREDITS_CATEGORY: &str = "/Credits";

/// SKU family key of the items usable on any heist
pub const UNIVERSAL_FAMILY_KEY: &str = "uni";

/// Display name for a derived family key
pub fn family_display_name(key: &str) -> String {
    if key == UNIVERSAL_FAMILY_KEY {
        return "Universal".to_string();
    }
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Default)]
struct CatalogSnapshot {
    items: Vec<CatalogItem>,
    wallets: Vec<WalletBalance>,
}

/// Read-mostly cache over the last-fetched catalog and wallet state.
///
/// Refreshes replace the snapshot wholesale so readers never observe a
/// half-updated catalog; a failed refresh leaves the previous snapshot intact.
pub struct CatalogService<S>
where
    S: ShopApi,
{
    api: Arc<S>,
    credentials: SharedCredentials,
    cache: RwLock<CatalogSnapshot>,
}

impl<S> CatalogService<S>
where
    S: ShopApi,
{
    pub fn new(api: Arc<S>, credentials: SharedCredentials) -> Self {
        Self {
            api,
            credentials,
            cache: RwLock::new(CatalogSnapshot::default()),
        }
    }

    async fn session(&self) -> Result<Credentials, Error> {
        self.credentials.read().await.clone().ok_or(Error::NotLoggedIn)
    }

    /// Replace the full item list; partial catalogs are never merged in
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), Error> {
        let session = self.session().await?;
        let items = self.api.fetch_catalog(&session).await?;
        debug!(items = items.len(), "catalog refreshed");
        self.cache.write().await.items = items;
        Ok(())
    }

    /// Fetch balances for the fixed currency set; fails wholesale, leaving
    /// the previous wallet state untouched
    #[instrument(skip(self))]
    pub async fn refresh_wallets(&self) -> Result<(), Error> {
        let session = self.session().await?;
        let mut wallets = Vec::with_capacity(WALLET_CURRENCIES.len());
        for code in WALLET_CURRENCIES {
            wallets.push(self.api.fetch_wallet(&session, code).await?);
        }
        self.cache.write().await.wallets = wallets;
        Ok(())
    }

    pub async fn clear(&self) {
        *self.cache.write().await = CatalogSnapshot::default();
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.items.is_empty()
    }

    pub async fn items(&self) -> Vec<CatalogItem> {
        self.cache.read().await.items.clone()
    }

    pub async fn find_by_id(&self, item_id: &str) -> Result<CatalogItem, Error> {
        self.cache
            .read()
            .await
            .items
            .iter()
            .find(|i| i.item_id == item_id)
            .cloned()
            .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))
    }

    pub async fn find_by_sku(&self, sku: &str) -> Result<CatalogItem, Error> {
        self.cache
            .read()
            .await
            .items
            .iter()
            .find(|i| i.sku == sku)
            .cloned()
            .ok_or_else(|| Error::ItemNotFound(sku.to_string()))
    }

    pub async fn find_by_category(&self, category_path: &str) -> Result<Vec<CatalogItem>, Error> {
        let matches: Vec<CatalogItem> = self
            .cache
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.category_path == category_path)
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(Error::ItemNotFound(category_path.to_string()));
        }
        Ok(matches)
    }

    /// Items sold in the credits store
    pub async fn credit_items(&self) -> Result<Vec<CatalogItem>, Error> {
        self.find_by_category(CREDITS_CATEGORY).await
    }

    /// Group the asset catalog by the SKU-derived family key.
    ///
    /// First-encounter order is preserved across families; fetch order is
    /// preserved within each family.
    pub async fn families(&self) -> Vec<AssetFamily> {
        let cache = self.cache.read().await;
        let mut families: Vec<AssetFamily> = Vec::new();
        for item in &cache.items {
            if item.category_path != PREPLANNING_CATEGORY {
                continue;
            }
            let Some(key) = item.family_key() else {
                continue;
            };
            match families.iter_mut().find(|f| f.key == key) {
                Some(family) => family.items.push(item.clone()),
                None => families.push(AssetFamily {
                    key: key.to_string(),
                    display_name: family_display_name(key),
                    items: vec![item.clone()],
                }),
            }
        }
        families
    }

    pub async fn family(&self, key: &str) -> Result<AssetFamily, Error> {
        self.families()
            .await
            .into_iter()
            .find(|f| f.key == key)
            .ok_or_else(|| Error::ItemNotFound(key.to_string()))
    }

    pub async fn wallets(&self) -> Vec<WalletBalance> {
        self.cache.read().await.wallets.clone()
    }

    pub async fn wallet(&self, currency_code: &str) -> Result<WalletBalance, Error> {
        self.cache
            .read()
            .await
            .wallets
            .iter()
            .find(|w| w.currency_code == currency_code)
            .cloned()
            .ok_or_else(|| Error::WalletNotFound(currency_code.to_string()))
    }
}
