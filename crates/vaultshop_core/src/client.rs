use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::CatalogService;
use crate::checkout::OrderExecutor;
use crate::config::Settings;
use crate::entities::Credentials;
use crate::error::Error;
use crate::ports::{AuthApi, ShopApi, SnapshotStore};
use crate::session::SessionManager;

/// Top-level handle wiring the session, catalog cache and order executor
/// around one shared credential set. There is exactly one of these per
/// process and all state lives inside it.
pub struct ShopClient<A, S, P>
where
    A: AuthApi + 'static,
    S: ShopApi + 'static,
    P: SnapshotStore + 'static,
{
    session: Arc<SessionManager<A, P>>,
    catalog: Arc<CatalogService<S>>,
    executor: Arc<OrderExecutor<S>>,
    renew_interval: Duration,
    wallet_interval: Duration,
    wallet_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<A, S, P> ShopClient<A, S, P>
where
    A: AuthApi + 'static,
    S: ShopApi + 'static,
    P: SnapshotStore + 'static,
{
    pub fn new(auth: Arc<A>, shop: Arc<S>, snapshots: Arc<P>, settings: &Settings) -> Self {
        let session = Arc::new(SessionManager::new(auth, snapshots));
        let credentials = session.credentials();
        let catalog = Arc::new(CatalogService::new(Arc::clone(&shop), Arc::clone(&credentials)));
        let executor = Arc::new(OrderExecutor::new(
            shop,
            Arc::clone(&catalog),
            credentials,
            Duration::from_millis(settings.checkout.throttle_ms),
        ));
        Self {
            session,
            catalog,
            executor,
            renew_interval: Duration::from_secs(settings.session.renew_interval_secs),
            wallet_interval: Duration::from_secs(settings.session.wallet_refresh_secs),
            wallet_task: std::sync::Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager<A, P>> {
        &self.session
    }

    pub fn catalog(&self) -> &Arc<CatalogService<S>> {
        &self.catalog
    }

    pub fn executor(&self) -> &Arc<OrderExecutor<S>> {
        &self.executor
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.is_logged_in().await
    }

    /// Log in and bring the client to a ready state: catalog and wallets
    /// fetched, renewal and wallet-refresh timers armed.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        persist: bool,
    ) -> Result<Credentials, Error> {
        let creds = self.session.login(login, password, persist).await?;
        self.prime().await?;
        Ok(creds)
    }

    /// Resume a persisted session, if one exists and opted into auto-login
    pub async fn restore(&self) -> Result<Option<Credentials>, Error> {
        let Some(creds) = self.session.restore().await? else {
            return Ok(None);
        };
        self.prime().await?;
        Ok(Some(creds))
    }

    async fn prime(&self) -> Result<(), Error> {
        self.catalog.refresh().await?;
        self.catalog.refresh_wallets().await?;
        self.session.spawn_auto_renew(self.renew_interval);
        self.spawn_wallet_refresh();
        info!("client ready");
        Ok(())
    }

    /// Periodic wallet re-fetch so displayed balances track server state
    fn spawn_wallet_refresh(&self) {
        let catalog = Arc::clone(&self.catalog);
        let interval = self.wallet_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match catalog.refresh_wallets().await {
                    Ok(()) => {}
                    Err(Error::NotLoggedIn) => break,
                    Err(e) => warn!(error = %e, "periodic wallet refresh failed"),
                }
            }
        });

        let mut slot = self.wallet_task.lock().expect("wallet task lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Drop the session, timers and every cached snapshot. Idempotent.
    pub async fn logout(&self) {
        if let Some(handle) = self
            .wallet_task
            .lock()
            .expect("wallet task lock poisoned")
            .take()
        {
            handle.abort();
        }
        self.session.logout().await;
        self.catalog.clear().await;
    }
}
