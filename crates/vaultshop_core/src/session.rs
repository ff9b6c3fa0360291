use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::entities::Credentials;
use crate::error::{AuthError, Error};
use crate::ports::{AuthApi, SnapshotStore};
use crate::token;

/// Renewal is skipped while a token still has more than this many seconds left
pub const RENEWAL_MARGIN_SECS: i64 = 120;

/// The single writer of the process-wide credential set
pub type SharedCredentials = Arc<RwLock<Option<Credentials>>>;

pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Owns the credential lifecycle: password-grant login, silent renewal with
/// refresh-grant and password fallback, snapshot persistence, logout.
///
/// Renewal runs as a cancellable repeating task armed at login and stopped
/// explicitly on logout.
pub struct SessionManager<A, P>
where
    A: AuthApi,
    P: SnapshotStore,
{
    auth: Arc<A>,
    snapshots: Arc<P>,
    credentials: SharedCredentials,
    persist: AtomicBool,
    renew_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<A, P> SessionManager<A, P>
where
    A: AuthApi + 'static,
    P: SnapshotStore + 'static,
{
    pub fn new(auth: Arc<A>, snapshots: Arc<P>) -> Self {
        Self {
            auth,
            snapshots,
            credentials: Arc::new(RwLock::new(None)),
            persist: AtomicBool::new(false),
            renew_task: std::sync::Mutex::new(None),
        }
    }

    /// Handle to the credential set for read-side collaborators
    pub fn credentials(&self) -> SharedCredentials {
        Arc::clone(&self.credentials)
    }

    pub async fn current(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// Exchange login/password for a token pair via password grant.
    ///
    /// With `persist` set the snapshot (including login/password for the
    /// re-auth fallback) is written through the snapshot store; without it any
    /// existing snapshot is deleted.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        persist: bool,
    ) -> Result<Credentials, Error> {
        if login.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "login or password cannot be empty".to_string(),
            ));
        }

        let bundle = self.auth.password_grant(login, password).await?;

        let mut creds = Credentials::from_bundle(bundle, epoch_now());
        creds.auto_login = persist;
        if persist {
            creds.login = Some(login.to_string());
            creds.password = Some(password.to_string());
            self.snapshots.save(&creds).await?;
        } else {
            self.snapshots.delete().await.ok();
        }
        self.persist.store(persist, Ordering::SeqCst);

        info!(display_name = %creds.display_name, "logged in");

        *self.credentials.write().await = Some(creds.clone());
        Ok(creds)
    }

    /// Restore a persisted session: re-authenticate with the stored
    /// login/password when the snapshot carries the auto-login flag.
    pub async fn restore(&self) -> Result<Option<Credentials>, Error> {
        let Some(snapshot) = self.snapshots.load().await? else {
            return Ok(None);
        };
        if !snapshot.auto_login {
            return Ok(None);
        }
        let (Some(login), Some(password)) = (snapshot.login, snapshot.password) else {
            return Ok(None);
        };

        debug!("restoring persisted session");
        let creds = self.login(&login, &password, true).await?;
        Ok(Some(creds))
    }

    /// Idempotent renewal check.
    ///
    /// Policy, evaluated in order:
    /// 1. access token has > 120 s left and not forced: no-op;
    /// 2. refresh token has > 120 s left and not forced: refresh grant,
    ///    escalating to 3 on failure;
    /// 3. full password re-auth with the stored login/password; failure
    ///    invalidates the session.
    #[instrument(skip(self))]
    pub async fn renew(&self, force: bool) -> Result<(), Error> {
        let current = self
            .credentials
            .read()
            .await
            .clone()
            .ok_or(Error::NotLoggedIn)?;
        let now = epoch_now();

        if !force && self.access_remaining(&current, now) > RENEWAL_MARGIN_SECS {
            return Ok(());
        }

        let mut bundle = None;
        if !force && self.refresh_remaining(&current, now) > RENEWAL_MARGIN_SECS {
            match self.auth.refresh_grant(&current.refresh_token).await {
                Ok(b) => bundle = Some(b),
                Err(e) => {
                    warn!(error = %e, "refresh grant failed, falling back to password re-auth")
                }
            }
        }

        let bundle = match bundle {
            Some(b) => b,
            None => {
                let (Some(login), Some(password)) =
                    (current.login.as_deref(), current.password.as_deref())
                else {
                    // Nothing to fall back on; the session is beyond recovery
                    self.invalidate().await;
                    return Err(Error::Auth(AuthError::SessionExpired));
                };
                match self.auth.password_grant(login, password).await {
                    Ok(b) => b,
                    Err(e) => {
                        error!(error = %e, "password re-auth failed, session invalidated");
                        self.invalidate().await;
                        return Err(e);
                    }
                }
            }
        };

        let mut next = Credentials::from_bundle(bundle, epoch_now());
        next.auto_login = current.auto_login;
        next.login = current.login;
        next.password = current.password;

        if self.persist.load(Ordering::SeqCst) {
            self.snapshots.save(&next).await?;
        }

        debug!("session renewed");
        *self.credentials.write().await = Some(next);
        Ok(())
    }

    /// Arm the background renewal task.
    ///
    /// Re-arms itself on the fixed interval after every attempt until logout
    /// or until a renewal failure invalidates the session.
    pub fn spawn_auto_renew(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !manager.is_logged_in().await {
                    break;
                }
                match manager.renew(false).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal_for_session() => {
                        error!(error = %e, "background renewal gave up");
                        break;
                    }
                    Err(e) => warn!(error = %e, "background renewal attempt failed"),
                }
            }
        });

        let mut slot = self.renew_task.lock().expect("renew task lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Clear credentials and the persisted snapshot. Idempotent.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(handle) = self
            .renew_task
            .lock()
            .expect("renew task lock poisoned")
            .take()
        {
            handle.abort();
        }

        let previous = self.credentials.write().await.take();
        self.persist.store(false, Ordering::SeqCst);
        if previous.is_some() {
            if let Err(e) = self.snapshots.delete().await {
                warn!(error = %e, "failed to delete credential snapshot");
            }
            info!("logged out");
        }
    }

    async fn invalidate(&self) {
        *self.credentials.write().await = None;
    }

    /// Prefer the token's own expiry claim; opaque tokens fall back to the
    /// issuance timestamp arithmetic.
    fn access_remaining(&self, creds: &Credentials, now: i64) -> i64 {
        token::remaining_secs(&creds.access_token, now)
            .unwrap_or_else(|| creds.access_remaining_secs(now))
    }

    fn refresh_remaining(&self, creds: &Credentials, now: i64) -> i64 {
        token::remaining_secs(&creds.refresh_token, now)
            .unwrap_or_else(|| creds.refresh_remaining_secs(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TokenBundle;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockAuth {
        password_calls: Mutex<u32>,
        refresh_calls: Mutex<u32>,
        fail_password: bool,
        fail_refresh: bool,
        /// TTLs handed out with every successful grant
        expires_in: i64,
        refresh_expires_in: i64,
    }

    impl MockAuth {
        fn healthy() -> Self {
            Self {
                expires_in: 3600,
                refresh_expires_in: 86400,
                ..Default::default()
            }
        }

        fn bundle(&self) -> TokenBundle {
            TokenBundle {
                access_token: "access-opaque".to_string(),
                refresh_token: "refresh-opaque".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: self.expires_in,
                refresh_expires_in: self.refresh_expires_in,
                user_id: "user-1".to_string(),
                display_name: "Dallas".to_string(),
            }
        }
    }

    #[async_trait]
    impl AuthApi for MockAuth {
        async fn password_grant(&self, _: &str, _: &str) -> Result<TokenBundle, Error> {
            *self.password_calls.lock().unwrap() += 1;
            if self.fail_password {
                return Err(Error::Auth(AuthError::InvalidCredentials));
            }
            Ok(self.bundle())
        }

        async fn refresh_grant(&self, _: &str) -> Result<TokenBundle, Error> {
            *self.refresh_calls.lock().unwrap() += 1;
            if self.fail_refresh {
                return Err(Error::Transport("connection reset".to_string()));
            }
            Ok(self.bundle())
        }
    }

    #[derive(Default)]
    struct MockSnapshots {
        stored: Mutex<Option<Credentials>>,
    }

    #[async_trait]
    impl SnapshotStore for MockSnapshots {
        async fn load(&self) -> Result<Option<Credentials>, Error> {
            Ok(self.stored.lock().unwrap().clone())
        }
        async fn save(&self, credentials: &Credentials) -> Result<(), Error> {
            *self.stored.lock().unwrap() = Some(credentials.clone());
            Ok(())
        }
        async fn delete(&self) -> Result<(), Error> {
            *self.stored.lock().unwrap() = None;
            Ok(())
        }
    }

    fn manager(auth: MockAuth) -> Arc<SessionManager<MockAuth, MockSnapshots>> {
        Arc::new(SessionManager::new(
            Arc::new(auth),
            Arc::new(MockSnapshots::default()),
        ))
    }

    /// Rewrite the issuance timestamp so the given remaining windows hold now
    async fn age_session(
        manager: &SessionManager<MockAuth, MockSnapshots>,
        access_left: i64,
        refresh_left: i64,
    ) {
        let mut guard = manager.credentials.write().await;
        let creds = guard.as_mut().unwrap();
        creds.issued_at = epoch_now() - creds.expires_in + access_left;
        creds.refresh_expires_in = creds.expires_in - access_left + refresh_left;
    }

    #[tokio::test]
    async fn test_login_persists_snapshot() {
        let m = manager(MockAuth::healthy());
        let creds = m.login("dallas", "hunter2", true).await.unwrap();

        assert!(creds.auto_login);
        assert_eq!(creds.login.as_deref(), Some("dallas"));
        let stored = m.snapshots.stored.lock().unwrap().clone().unwrap();
        assert_eq!(stored.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_login_without_persist_clears_snapshot() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();
        m.login("dallas", "hunter2", false).await.unwrap();

        assert!(m.snapshots.stored.lock().unwrap().is_none());
        let creds = m.current().await.unwrap();
        assert!(!creds.auto_login);
        assert!(creds.password.is_none());
    }

    #[tokio::test]
    async fn test_login_rejects_empty_fields() {
        let m = manager(MockAuth::healthy());
        assert!(matches!(
            m.login("", "pw", false).await,
            Err(Error::Validation(_))
        ));
        assert!(!m.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_auth_error() {
        let m = manager(MockAuth {
            fail_password: true,
            ..MockAuth::healthy()
        });
        assert!(matches!(
            m.login("dallas", "wrong", false).await,
            Err(Error::Auth(AuthError::InvalidCredentials))
        ));
        assert!(!m.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_renew_noop_while_access_token_fresh() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", false).await.unwrap();
        m.renew(false).await.unwrap();

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), 0);
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 1); // login only
    }

    #[tokio::test]
    async fn test_renew_uses_refresh_grant_inside_margin() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", false).await.unwrap();
        age_session(&m, 100, 10_000).await;

        m.renew(false).await.unwrap();

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), 1);
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 1); // login only
        // Renewed credentials are fresh again
        let creds = m.current().await.unwrap();
        assert!(creds.access_remaining_secs(epoch_now()) > RENEWAL_MARGIN_SECS);
    }

    #[tokio::test]
    async fn test_renew_uses_password_grant_when_both_inside_margin() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();
        age_session(&m, 100, 50).await;

        m.renew(false).await.unwrap();

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), 0);
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 2); // login + re-auth
    }

    #[tokio::test]
    async fn test_renew_escalates_to_password_on_refresh_failure() {
        let m = manager(MockAuth {
            fail_refresh: true,
            ..MockAuth::healthy()
        });
        m.login("dallas", "hunter2", true).await.unwrap();
        age_session(&m, 100, 10_000).await;

        m.renew(false).await.unwrap();

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), 1);
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_renew_without_stored_password_invalidates_session() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", false).await.unwrap();
        age_session(&m, 100, 50).await;

        let err = m.renew(false).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::SessionExpired)));
        assert!(!m.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_renew_force_goes_straight_to_password_grant() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();

        m.renew(true).await.unwrap();

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), 0);
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_renew_repersists_when_persistence_enabled() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();
        let first_issued = m.snapshots.stored.lock().unwrap().clone().unwrap().issued_at;
        age_session(&m, 100, 10_000).await;

        m.renew(false).await.unwrap();

        let stored = m.snapshots.stored.lock().unwrap().clone().unwrap();
        assert!(stored.issued_at >= first_issued);
        assert_eq!(stored.login.as_deref(), Some("dallas"));
        assert_eq!(stored.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();

        m.logout().await;
        assert!(!m.is_logged_in().await);
        assert!(m.snapshots.stored.lock().unwrap().is_none());

        // Second logout is a no-op
        m.logout().await;
        assert!(!m.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_restore_reauthenticates_with_stored_credentials() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", true).await.unwrap();
        let snapshot = m.snapshots.stored.lock().unwrap().clone();

        // Fresh manager sharing the same snapshot contents
        let m2 = manager(MockAuth::healthy());
        *m2.snapshots.stored.lock().unwrap() = snapshot;

        let restored = m2.restore().await.unwrap();
        assert!(restored.is_some());
        assert!(m2.is_logged_in().await);
        assert_eq!(*m2.auth.password_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restore_without_snapshot_is_none() {
        let m = manager(MockAuth::healthy());
        assert!(m.restore().await.unwrap().is_none());
        assert_eq!(*m.auth.password_calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_renew_rearms_and_stops_on_logout() {
        let m = manager(MockAuth::healthy());
        m.login("dallas", "hunter2", false).await.unwrap();
        // Age the session so the first tick has to renew; grants after that
        // hand out healthy TTLs again.
        {
            let mut guard = m.credentials.write().await;
            let creds = guard.as_mut().unwrap();
            creds.expires_in = 0;
            creds.refresh_expires_in = 1_000_000;
        }

        m.spawn_auto_renew(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(*m.auth.refresh_calls.lock().unwrap() >= 1);
        let calls_before = *m.auth.refresh_calls.lock().unwrap();

        m.logout().await;
        tokio::time::sleep(Duration::from_secs(180)).await;
        tokio::task::yield_now().await;

        assert_eq!(*m.auth.refresh_calls.lock().unwrap(), calls_before);
    }
}
