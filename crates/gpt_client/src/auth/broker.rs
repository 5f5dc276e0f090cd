use std::sync::Arc;

use async_trait::async_trait;
use chat_core::logging::session_tag;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::handshake::{AuthError, AuthStage, IssuedToken, LoginHandshake};
use super::token_cache::TokenCache;

/// Turns an email/password pair into a bearer token.
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    async fn acquire(
        &self,
        email: &str,
        password: &str,
        session_name: &str,
    ) -> Result<IssuedToken, AuthError>;
}

#[async_trait]
impl CredentialAcquirer for LoginHandshake {
    async fn acquire(
        &self,
        email: &str,
        password: &str,
        session_name: &str,
    ) -> Result<IssuedToken, AuthError> {
        debug!("{} - running login handshake", session_tag(session_name));
        self.run(email, password).await
    }
}

const SEEDED_TOKEN_DAYS: i64 = 365 * 10;

type Slot = Arc<Mutex<Option<IssuedToken>>>;

/// Hands out bearer tokens per session: memory, then the cache file, then a
/// fresh login. Concurrent callers of one session share a single login.
pub struct CredentialBroker {
    acquirer: Arc<dyn CredentialAcquirer>,
    cache: Option<Arc<TokenCache>>,
    slots: DashMap<String, Slot>,
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("cache", &self.cache)
            .field("sessions", &self.slots.len())
            .finish()
    }
}

impl CredentialBroker {
    pub fn new(acquirer: Arc<dyn CredentialAcquirer>, cache: Option<Arc<TokenCache>>) -> Self {
        Self {
            acquirer,
            cache,
            slots: DashMap::new(),
        }
    }

    pub fn cache(&self) -> Option<&Arc<TokenCache>> {
        self.cache.as_ref()
    }

    fn slot(&self, session_name: &str) -> Slot {
        self.slots
            .entry(session_name.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// A bearer token for `session_name` that is valid right now.
    pub async fn bearer(
        &self,
        session_name: &str,
        email: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let tag = session_tag(session_name);
        let slot = self.slot(session_name);
        let mut current = slot.lock().await;
        let now = Utc::now();

        if let Some(token) = current.as_ref().filter(|token| token.is_valid_at(now)) {
            return Ok(token.token.clone());
        }

        if let Some(cached) = self.load_cached(session_name, now).await {
            debug!("{tag} - using cached token");
            let token = cached.token.clone();
            *current = Some(cached);
            return Ok(token);
        }

        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingLogin);
        }

        info!("{tag} - no valid token, logging in");
        let issued = self.acquirer.acquire(email, password, session_name).await?;
        if !issued.is_valid_at(Utc::now()) {
            return Err(AuthError::Protocol {
                stage: AuthStage::StepThree,
                message: format!("issued token already expired at {}", issued.expires_at),
            });
        }

        self.store_cached(session_name, &issued).await;

        let token = issued.token.clone();
        *current = Some(issued);
        Ok(token)
    }

    /// The token currently held for `session_name` without logging in.
    pub async fn cached(&self, session_name: &str) -> Option<IssuedToken> {
        let slot = self.slot(session_name);
        let mut current = slot.lock().await;
        let now = Utc::now();
        if let Some(token) = current.as_ref().filter(|token| token.is_valid_at(now)) {
            return Some(token.clone());
        }
        let cached = self.load_cached(session_name, now).await?;
        *current = Some(cached.clone());
        Some(cached)
    }

    /// A valid token for a session that runs on its cache entry alone. Never
    /// logs in; once the entry has expired this fails with
    /// [`AuthError::TokenExpired`].
    pub async fn cached_bearer(&self, session_name: &str) -> Result<String, AuthError> {
        let slot = self.slot(session_name);
        let mut current = slot.lock().await;
        let now = Utc::now();

        if let Some(token) = current.as_ref().filter(|token| token.is_valid_at(now)) {
            return Ok(token.token.clone());
        }
        if let Some(cached) = self.load_cached(session_name, now).await {
            let token = cached.token.clone();
            *current = Some(cached);
            return Ok(token);
        }

        match current.as_ref() {
            Some(expired) => {
                warn!(
                    "{} - cached token expired at {}",
                    session_tag(session_name),
                    expired.expires_at
                );
                Err(AuthError::TokenExpired {
                    session: session_name.to_string(),
                    expires_at: expired.expires_at,
                })
            }
            None => Err(AuthError::MissingLogin),
        }
    }

    /// Record a bearer token supplied by the caller. It carries no expiry of its
    /// own, so it is held in memory with a far-future one and never written to
    /// the cache file.
    pub async fn seed(&self, session_name: &str, token: &str) {
        let slot = self.slot(session_name);
        *slot.lock().await = Some(IssuedToken {
            token: token.to_string(),
            expires_at: Utc::now() + Duration::days(SEEDED_TOKEN_DAYS),
        });
    }

    /// Forget the in-memory token of `session_name`. The cache file is untouched.
    pub async fn invalidate(&self, session_name: &str) {
        let slot = self.slot(session_name);
        *slot.lock().await = None;
    }

    async fn load_cached(&self, session_name: &str, now: DateTime<Utc>) -> Option<IssuedToken> {
        let cache = Arc::clone(self.cache.as_ref()?);
        let session = session_name.to_string();
        let cached = tokio::task::spawn_blocking(move || cache.load_at(&session, now))
            .await
            .unwrap_or_else(|err| {
                warn!("Token cache lookup did not complete: {err}");
                None
            })?;
        Some(IssuedToken {
            token: cached.access_token,
            expires_at: cached.expires,
        })
    }

    /// Cache write failures are logged; the token stays usable in memory.
    async fn store_cached(&self, session_name: &str, issued: &IssuedToken) {
        let Some(cache) = self.cache.as_ref().map(Arc::clone) else {
            return;
        };
        let tag = session_tag(session_name);
        let session = session_name.to_string();
        let token = issued.token.clone();
        let expires_at = issued.expires_at;
        match tokio::task::spawn_blocking(move || cache.store(&session, &token, expires_at)).await
        {
            Ok(Ok(())) => debug!("{tag} - access token cached"),
            Ok(Err(err)) => warn!("{tag} - failed to cache access token: {err}"),
            Err(err) => warn!("{tag} - token cache write did not complete: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingAcquirer {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    impl CountingAcquirer {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialAcquirer for CountingAcquirer {
        async fn acquire(
            &self,
            _email: &str,
            _password: &str,
            session_name: &str,
        ) -> Result<IssuedToken, AuthError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(IssuedToken {
                token: format!("{session_name}-token-{call}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    struct RefusingAcquirer;

    #[async_trait]
    impl CredentialAcquirer for RefusingAcquirer {
        async fn acquire(&self, _: &str, _: &str, _: &str) -> Result<IssuedToken, AuthError> {
            Err(AuthError::InvalidCredentials {
                stage: AuthStage::StepTwo,
                url: "https://auth0.openai.com/u/login/password".into(),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_login() {
        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = Arc::new(CredentialBroker::new(acquirer.clone(), None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.bearer("s1", "a@b.c", "pw").await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.expect("join").expect("token");
            assert_eq!(token, "s1-token-1");
        }
        assert_eq!(acquirer.calls(), 1);
    }

    #[tokio::test]
    async fn sessions_log_in_independently() {
        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = CredentialBroker::new(acquirer.clone(), None);

        let (a, b) = tokio::join!(
            broker.bearer("a", "a@b.c", "pw"),
            broker.bearer("b", "a@b.c", "pw")
        );
        assert!(a.expect("a").starts_with("a-token-"));
        assert!(b.expect("b").starts_with("b-token-"));
        assert_eq!(acquirer.calls(), 2);
    }

    #[tokio::test]
    async fn valid_cache_entry_skips_login() {
        let dir = tempdir().expect("tempdir");
        let cache = Arc::new(TokenCache::new(dir.path().join("gpt-cache.json")));
        cache
            .store("s1", "from-disk", Utc::now() + Duration::hours(1))
            .expect("store");

        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = CredentialBroker::new(acquirer.clone(), Some(cache));

        assert_eq!(broker.bearer("s1", "a@b.c", "pw").await.unwrap(), "from-disk");
        assert_eq!(acquirer.calls(), 0);
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_login_and_is_replaced() {
        let dir = tempdir().expect("tempdir");
        let cache = Arc::new(TokenCache::new(dir.path().join("gpt-cache.json")));
        cache
            .store("s1", "stale", Utc::now() - Duration::minutes(1))
            .expect("store");

        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = CredentialBroker::new(acquirer.clone(), Some(cache.clone()));

        assert_eq!(broker.bearer("s1", "a@b.c", "pw").await.unwrap(), "s1-token-1");
        assert_eq!(cache.load("s1").unwrap().access_token, "s1-token-1");
    }

    #[tokio::test]
    async fn expired_memory_token_is_never_reused() {
        let acquirer = CountingAcquirer::new(Duration::milliseconds(100));
        let broker = CredentialBroker::new(acquirer.clone(), None);

        assert_eq!(broker.bearer("s1", "a@b.c", "pw").await.unwrap(), "s1-token-1");
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(broker.bearer("s1", "a@b.c", "pw").await.unwrap(), "s1-token-2");
    }

    #[tokio::test]
    async fn login_failure_is_returned_and_nothing_is_kept() {
        let broker = CredentialBroker::new(Arc::new(RefusingAcquirer), None);
        let err = broker.bearer("s1", "a@b.c", "wrong").await.unwrap_err();

        assert!(err.is_invalid_credentials());
        assert!(broker.cached("s1").await.is_none());
    }

    #[tokio::test]
    async fn seeded_token_is_served_without_login_and_not_persisted() {
        let dir = tempdir().expect("tempdir");
        let cache = Arc::new(TokenCache::new(dir.path().join("gpt-cache.json")));
        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = CredentialBroker::new(acquirer.clone(), Some(cache.clone()));

        broker.seed("s1", "raw-token").await;
        assert_eq!(broker.bearer("s1", "", "").await.unwrap(), "raw-token");
        assert!(cache.load("s1").is_none());
        assert_eq!(acquirer.calls(), 0);

        broker.invalidate("s1").await;
        assert!(matches!(
            broker.bearer("s1", "", "").await,
            Err(AuthError::MissingLogin)
        ));
    }

    #[tokio::test]
    async fn cache_backed_session_stops_at_recorded_expiry() {
        let dir = tempdir().expect("tempdir");
        let cache = Arc::new(TokenCache::new(dir.path().join("gpt-cache.json")));
        let expires = Utc::now() + Duration::milliseconds(300);
        cache.store("s1", "from-disk", expires).expect("store");

        let acquirer = CountingAcquirer::new(Duration::hours(1));
        let broker = CredentialBroker::new(acquirer.clone(), Some(cache));

        assert!(broker.cached("s1").await.is_some());
        assert_eq!(broker.cached_bearer("s1").await.unwrap(), "from-disk");

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        match broker.cached_bearer("s1").await {
            Err(AuthError::TokenExpired {
                session,
                expires_at,
            }) => {
                assert_eq!(session, "s1");
                assert_eq!(expires_at, expires);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(acquirer.calls(), 0);
    }

    #[tokio::test]
    async fn cache_backed_session_without_any_token_needs_login() {
        let broker = CredentialBroker::new(CountingAcquirer::new(Duration::hours(1)), None);

        assert!(matches!(
            broker.cached_bearer("s1").await,
            Err(AuthError::MissingLogin)
        ));
    }
}
