use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use vaultshop_core::entities::{
    CatalogItem, Credentials, OrderDraft, OrderReceipt, OrderStatus, PriceTag, TokenBundle,
    WalletBalance,
};
use vaultshop_core::error::AuthError;
use vaultshop_core::ports::{AuthApi, ShopApi};
use vaultshop_core::Error;

use crate::network::build_platform_client;

const TOKEN_PATH: &str = "/iam/v3/oauth/token";
const CATALOG_PATH: &str =
    "/platform/public/namespaces/pd3/items/byCriteria?limit=2147483647&includeSubCategoryItem=true";

/// Pre-encoded client credentials for the token endpoint basic auth
const BASIC_AUTH: &str = "Basic MGIzYmZkZjVhMjVmNDUyZmJkMzNhMzYxMzNhMmRlYWI6";
const CLIENT_ID: &str = "d682bcf949cb4744b3cd4295bbdd9fef";

/// Client for the AccelByte-backed storefront platform.
///
/// Implements both the token endpoints and the shop/order endpoints; one
/// instance serves the whole process.
pub struct NebulaClient {
    client: Client,
    base_url: String,
}

impl NebulaClient {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Ok(Self {
            client: build_platform_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Post-login requests carry both the bearer header and the token cookies
    fn authed(&self, builder: reqwest::RequestBuilder, session: &Credentials) -> reqwest::RequestBuilder {
        builder
            .header(
                header::AUTHORIZATION,
                format!("{} {}", session.token_type, session.access_token),
            )
            .header(
                header::COOKIE,
                format!(
                    "access_token={}; refresh_token={}",
                    session.access_token, session.refresh_token
                ),
            )
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<TokenBundle, Error> {
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .header(header::AUTHORIZATION, BASIC_AUTH)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("token request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            warn!(status = %response.status(), "token grant rejected");
            return Err(Error::Auth(AuthError::InvalidCredentials));
        }

        let grant: TokenGrantResponse = response
            .json()
            .await
            .map_err(|_| Error::Auth(AuthError::MalformedResponse))?;
        Ok(grant.into())
    }
}

#[async_trait]
impl AuthApi for NebulaClient {
    #[instrument(skip(self, password))]
    async fn password_grant(&self, login: &str, password: &str) -> Result<TokenBundle, Error> {
        debug!("requesting password grant");
        self.token_grant(&[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("username", login),
            ("password", password),
            ("extend_exp", "true"),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenBundle, Error> {
        debug!("requesting refresh grant");
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[async_trait]
impl ShopApi for NebulaClient {
    #[instrument(skip_all)]
    async fn fetch_catalog(&self, session: &Credentials) -> Result<Vec<CatalogItem>, Error> {
        let response = self
            .authed(self.client.get(self.url(CATALOG_PATH)), session)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("catalog request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(Error::Fetch("failed to query the shop".to_string()));
        }

        let catalog: CatalogResponse = response
            .json()
            .await
            .map_err(|_| Error::Fetch("failed to parse shop response".to_string()))?;

        let items: Vec<CatalogItem> = catalog.data.into_iter().map(Into::into).collect();
        debug!(items = items.len(), "catalog fetched");
        Ok(items)
    }

    #[instrument(skip(self, session))]
    async fn fetch_wallet(
        &self,
        session: &Credentials,
        currency_code: &str,
    ) -> Result<WalletBalance, Error> {
        let path = format!(
            "/platform/public/namespaces/pd3/users/{}/wallets/{}",
            session.user_id, currency_code
        );
        let response = self
            .authed(self.client.get(self.url(&path)), session)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("wallet request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(Error::Fetch("failed to update wallets".to_string()));
        }

        let wallet: WalletResponse = response
            .json()
            .await
            .map_err(|_| Error::Fetch("failed to parse wallet response".to_string()))?;
        Ok(wallet.into())
    }

    #[instrument(skip(self, session, draft), fields(item_id = %draft.item_id))]
    async fn submit_order(
        &self,
        session: &Credentials,
        draft: &OrderDraft,
    ) -> Result<OrderReceipt, Error> {
        let path = format!(
            "/platform/public/namespaces/pd3/users/{}/orders",
            session.user_id
        );
        let response = self
            .authed(self.client.post(self.url(&path)), session)
            .json(&OrderRequest::from(draft))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("order request failed: {}", e)))?;

        // Any status other than 201 is a rejection; the body usually carries
        // a platform error message worth surfacing verbatim.
        if response.status() != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<OrderErrorResponse>(&body) {
                if let Some(message) = err.error_message {
                    return Err(Error::Order(message));
                }
            }
            return Err(Error::Order("failed to place an order".to_string()));
        }

        let receipt: OrderResponse = response
            .json()
            .await
            .map_err(|_| Error::Order("failed to read order response data".to_string()))?;
        let receipt: OrderReceipt = receipt.into();
        info!(order_no = %receipt.order_no, "order created");
        Ok(receipt)
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: i64,
    refresh_expires_in: i64,
    user_id: String,
    #[serde(default)]
    display_name: String,
}

impl From<TokenGrantResponse> for TokenBundle {
    fn from(r: TokenGrantResponse) -> Self {
        Self {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            refresh_expires_in: r.refresh_expires_in,
            user_id: r.user_id,
            display_name: r.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    item_id: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    category_path: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    purchasable: bool,
    #[serde(default)]
    listable: bool,
    #[serde(default = "default_use_count")]
    use_count: i64,
    #[serde(default)]
    region_data: Vec<RegionPrice>,
}

fn default_use_count() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionPrice {
    #[serde(default)]
    price: i64,
    #[serde(default)]
    discounted_price: i64,
    #[serde(default)]
    currency_code: String,
}

impl From<CatalogEntry> for CatalogItem {
    fn from(e: CatalogEntry) -> Self {
        // Only the first region entry is priced for the account's region
        let pricing = e.region_data.into_iter().next().map(|p| PriceTag {
            price: p.price,
            discounted_price: p.discounted_price,
            currency_code: p.currency_code,
        });
        Self {
            item_id: e.item_id,
            sku: e.sku,
            name: e.name,
            category_path: e.category_path,
            region: e.region,
            language: e.language,
            purchasable: e.purchasable,
            listable: e.listable,
            use_count: e.use_count,
            pricing,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletResponse {
    currency_code: String,
    #[serde(default)]
    balance: i64,
}

impl From<WalletResponse> for WalletBalance {
    fn from(w: WalletResponse) -> Self {
        Self {
            currency_code: w.currency_code,
            balance: w.balance,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    item_id: String,
    quantity: u32,
    price: i64,
    discounted_price: i64,
    currency_code: String,
    region: String,
    language: String,
    return_url: String,
}

impl From<&OrderDraft> for OrderRequest {
    fn from(d: &OrderDraft) -> Self {
        Self {
            item_id: d.item_id.clone(),
            quantity: d.quantity,
            price: d.price,
            discounted_price: d.discounted_price,
            currency_code: d.currency_code.clone(),
            region: d.region.clone(),
            language: d.language.clone(),
            return_url: d.return_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderErrorResponse {
    #[serde(default)]
    #[allow(dead_code)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_no: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    price: i64,
    #[serde(default)]
    tax: i64,
    #[serde(default)]
    vat: i64,
    #[serde(default)]
    sales_tax: i64,
    #[serde(default)]
    payment_provider_fee: i64,
    #[serde(default)]
    payment_method_fee: i64,
    #[serde(default)]
    currency: Option<OrderCurrency>,
    #[serde(default)]
    payment_station_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCurrency {
    #[serde(default)]
    currency_code: String,
    #[serde(default)]
    decimals: u32,
}

impl From<OrderResponse> for OrderReceipt {
    fn from(r: OrderResponse) -> Self {
        let (currency_code, currency_decimals) = r
            .currency
            .map(|c| (c.currency_code, c.decimals))
            .unwrap_or_default();
        Self {
            order_no: r.order_no,
            status: OrderStatus::from_wire(&r.status),
            price: r.price,
            tax: r.tax,
            vat: r.vat,
            sales_tax: r.sales_tax,
            payment_provider_fee: r.payment_provider_fee,
            payment_method_fee: r.payment_method_fee,
            currency_code,
            currency_decimals,
            payment_station_url: r.payment_station_url,
        }
    }
}
