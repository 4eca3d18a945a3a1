//! The wallet session manager.
//!
//! [`SessionManager`] owns the only copy of the session: the connected
//! account's [`PublicIdentity`], the wallet's auth token, and a `busy` flag.
//! It is constructed once at startup and handed to whatever needs it by
//! reference (typically an `Arc<SessionManager>`); there is no global.
//!
//! # Guarantees
//!
//! - `identity` is set if and only if `token` is set. Both change together
//!   on a successful `connect` and are cleared together by `disconnect`.
//! - One operation talks to the wallet at a time. A `tokio` mutex over the
//!   session is held for the full round trip; overlapping calls queue or
//!   are rejected with [`SessionError::Busy`] per [`ContentionPolicy`].
//! - `busy` is raised while an operation holds the session lock and lowered
//!   only after the lock is released, on every exit path, including timeout
//!   and caller cancellation. A disconnect clears the identity and raises
//!   `busy` in one published change.
//! - A failed `connect` or `sign_and_submit` never touches the session.
//!   `disconnect` always clears it, whatever the wallet answers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solticket_wallet_api::{
    AuthorizeRequest, AuthorizeResult, DeauthorizeRequest, SignAndSendRequest, SignAndSendResult,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::channel::{OpenChannel, WalletTransport};
use crate::config::{ContentionPolicy, SessionConfig};
use crate::error::{ChannelError, Operation, SessionError};
use crate::identity::{AuthToken, PublicIdentity, Signature, TransactionPayload};

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

/// What callers can observe about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// The connected account, or `None` when disconnected.
    pub identity: Option<PublicIdentity>,

    /// True while an operation is talking to the wallet.
    pub busy: bool,

    /// When the current session was authorized.
    pub connected_since: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn connected(&self) -> bool {
        self.identity.is_some()
    }
}

/// Outcome of [`SessionManager::disconnect`].
///
/// The local session is always cleared. `error` carries the wallet-side
/// failure, if any, for diagnostics.
#[derive(Debug, Default)]
pub struct DisconnectReport {
    /// The wallet confirmed the token was revoked.
    pub deauthorized: bool,

    pub error: Option<SessionError>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Session {
    identity: Option<PublicIdentity>,
    token: Option<AuthToken>,
    connected_since: Option<DateTime<Utc>>,
}

impl Session {
    fn clear(&mut self) -> Option<AuthToken> {
        self.identity = None;
        self.connected_since = None;
        self.token.take()
    }
}

/// Lowers `busy` on drop once raised.
///
/// Declared before the session lock is taken, so it drops after the lock is
/// released: `busy` never reads false while an operation holds the lock.
struct BusyGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
    raised: bool,
}

impl<'a> BusyGuard<'a> {
    fn new(state: &'a watch::Sender<SessionSnapshot>) -> Self {
        Self {
            state,
            raised: false,
        }
    }

    fn raise(&mut self) {
        self.raise_with(|_| {});
    }

    /// Apply `update` and raise `busy` in a single published change.
    fn raise_with(&mut self, update: impl FnOnce(&mut SessionSnapshot)) {
        self.state.send_modify(|s| {
            update(s);
            s.busy = true;
        });
        self.raised = true;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.raised {
            self.state.send_modify(|s| s.busy = false);
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Negotiates, holds, and tears down the wallet session.
pub struct SessionManager {
    transport: Arc<dyn WalletTransport>,
    config: SessionConfig,
    session: Mutex<Session>,
    state: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create a disconnected manager that reaches the wallet via `transport`.
    pub fn new(transport: Arc<dyn WalletTransport>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            transport,
            config,
            session: Mutex::new(Session::default()),
            state,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // --- Observed state ------------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<PublicIdentity> {
        self.state.borrow().identity
    }

    pub fn connected(&self) -> bool {
        self.state.borrow().connected()
    }

    pub fn busy(&self) -> bool {
        self.state.borrow().busy
    }

    /// Receive every state change, starting from the current state.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// [`subscribe`](Self::subscribe) as a `Stream`.
    pub fn changes(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.state.subscribe())
    }

    // --- Operations ----------------------------------------------------------

    /// Ask the wallet to authorize this app and store the resulting session.
    ///
    /// Always attempts a fresh authorization, even when already connected.
    /// On success the new identity and token replace the old ones; on any
    /// failure the previous session (if any) is left exactly as it was.
    pub async fn connect(&self) -> Result<PublicIdentity, SessionError> {
        let mut busy = BusyGuard::new(&self.state);
        let mut session = self.acquire(Operation::Authorize).await?;
        busy.raise();

        let request = AuthorizeRequest {
            identity: self.config.app_identity.clone(),
            cluster: self.config.cluster,
        };
        let outcome = self
            .round_trip(Operation::Authorize, self.config.timeouts.authorize, |mut ch| async move {
                ch.authorize(request).await
            })
            .await
            .and_then(|r| {
                r.map_err(|e| match e {
                    ChannelError::Rejected { code, message } => {
                        SessionError::AuthorizationFailed(format!("{code}: {message}"))
                    }
                    other => SessionError::Channel(other),
                })
            })
            .and_then(accept_authorization);

        let (identity, token) = match outcome {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, cluster = %self.config.cluster, "wallet connect failed");
                return Err(e);
            }
        };

        session.identity = Some(identity);
        session.token = Some(token);
        session.connected_since = Some(Utc::now());
        self.publish(&session);

        info!(identity = %identity, cluster = %self.config.cluster, "wallet connected");
        Ok(identity)
    }

    /// Revoke the session with the wallet and clear it locally.
    ///
    /// The local session is cleared before the wallet is contacted, so it
    /// ends up cleared even if the wallet call fails, times out, or this
    /// future is dropped. With no session held this is a no-op that never
    /// opens a channel. Queues behind any in-flight operation regardless of
    /// [`ContentionPolicy`].
    pub async fn disconnect(&self) -> DisconnectReport {
        let mut busy = BusyGuard::new(&self.state);
        let mut session = self.session.lock().await;

        let Some(token) = session.clear() else {
            debug!("disconnect requested with no session");
            return DisconnectReport::default();
        };
        busy.raise_with(|s| {
            s.identity = None;
            s.connected_since = None;
        });

        let request = DeauthorizeRequest {
            auth_token: token.as_str().to_owned(),
        };
        let error = match self
            .round_trip(Operation::Deauthorize, self.config.timeouts.deauthorize, |mut ch| async move {
                ch.deauthorize(request).await
            })
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(SessionError::Channel(e)),
            Err(timeout) => Some(timeout),
        };

        match &error {
            None => info!("wallet disconnected"),
            Some(e) => warn!(error = %e, "wallet deauthorize failed, local session cleared"),
        }
        DisconnectReport {
            deauthorized: error.is_none(),
            error,
        }
    }

    /// Have the wallet sign and submit one caller-built transaction.
    ///
    /// Fails with [`SessionError::NotConnected`] without contacting the
    /// wallet when no session is held. Any wallet-side failure surfaces as
    /// [`SessionError::SigningFailed`]; nothing is retried, since the wallet
    /// may already have broadcast the transaction. The session is never
    /// modified.
    pub async fn sign_and_submit(
        &self,
        payload: impl Into<TransactionPayload>,
    ) -> Result<Signature, SessionError> {
        let payload = payload.into();
        if !self.connected() {
            warn!("sign_and_submit called without a wallet session");
            return Err(SessionError::NotConnected);
        }

        let mut busy = BusyGuard::new(&self.state);
        let session = self.acquire(Operation::SignAndSend).await?;
        // A queued disconnect may have run while we waited.
        let Some(token) = session.token.as_ref() else {
            warn!("wallet session ended before sign_and_submit ran");
            return Err(SessionError::NotConnected);
        };
        busy.raise();

        let request = SignAndSendRequest {
            auth_token: token.as_str().to_owned(),
            payloads: vec![payload.to_base64()],
        };
        let outcome = self
            .round_trip(Operation::SignAndSend, self.config.timeouts.sign, |mut ch| async move {
                ch.sign_and_send(request).await
            })
            .await
            .and_then(|r| {
                r.and_then(single_signature)
                    .map_err(SessionError::SigningFailed)
            });

        match outcome {
            Ok(signature) => {
                info!(signature = %signature, bytes = payload.as_bytes().len(), "transaction submitted");
                Ok(signature)
            }
            Err(e) => {
                warn!(error = %e, "sign_and_submit failed");
                Err(e)
            }
        }
    }

    // --- Helpers -------------------------------------------------------------

    /// Take the session lock according to the contention policy.
    async fn acquire(&self, operation: Operation) -> Result<MutexGuard<'_, Session>, SessionError> {
        match self.config.contention {
            ContentionPolicy::Queue => Ok(self.session.lock().await),
            ContentionPolicy::Reject => self.session.try_lock().map_err(|_| {
                warn!(%operation, "rejected: another wallet operation is in flight");
                SessionError::Busy
            }),
        }
    }

    /// Open a channel, run `request` on it, and close it, within `limit`.
    ///
    /// The outer `Result` carries only [`SessionError::Timeout`]; the inner
    /// one is the channel's own answer, classified by the caller.
    async fn round_trip<T, F, Fut>(
        &self,
        operation: Operation,
        limit: Option<Duration>,
        request: F,
    ) -> Result<Result<T, ChannelError>, SessionError>
    where
        F: FnOnce(OpenChannel) -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let transport = self.transport.as_ref();
        let exchange = async move {
            let channel = OpenChannel::open(transport).await?;
            request(channel).await
        };

        match limit {
            None => Ok(exchange.await),
            Some(after) => tokio::time::timeout(after, exchange)
                .await
                .map_err(|_| SessionError::Timeout { operation, after }),
        }
    }

    fn publish(&self, session: &Session) {
        self.state.send_modify(|s| {
            s.identity = session.identity;
            s.connected_since = session.connected_since;
        });
    }
}

/// Validate an `authorize` result and extract the first account and token.
fn accept_authorization(
    result: AuthorizeResult,
) -> Result<(PublicIdentity, AuthToken), SessionError> {
    let account = result
        .accounts
        .first()
        .ok_or_else(|| SessionError::AuthorizationFailed("wallet returned no accounts".into()))?;
    let token = result
        .auth_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SessionError::AuthorizationFailed("wallet returned no auth token".into()))?;
    let identity = PublicIdentity::from_address(&account.address)?;
    Ok((identity, AuthToken::new(token)))
}

fn single_signature(result: SignAndSendResult) -> Result<Signature, ChannelError> {
    let [signature]: [String; 1] = result.signatures.try_into().map_err(|v: Vec<String>| {
        ChannelError::Protocol(format!("expected exactly one signature, got {}", v.len()))
    })?;
    if signature.is_empty() {
        return Err(ChannelError::Protocol("wallet returned an empty signature".into()));
    }
    Ok(Signature::new(signature))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use solticket_wallet_api::error::codes;
    use solticket_wallet_api::{AuthorizedAccount, Cluster, WalletErrorResponse};

    use super::*;
    use crate::channel::WalletChannel;
    use crate::config::Timeouts;
    use crate::memory::MemoryWallet;

    // ---------------------------------------------------------------------------
    // Scripted transport
    // ---------------------------------------------------------------------------

    /// Canned answers for each operation. An unscripted call fails as a broken
    /// channel.
    #[derive(Clone, Default)]
    struct Script {
        authorize: Option<Result<AuthorizeResult, ChannelError>>,
        deauthorize: Option<Result<(), ChannelError>>,
        sign: Option<Result<SignAndSendResult, ChannelError>>,
    }

    #[derive(Default)]
    struct Scripted {
        script: StdMutex<Script>,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
        requests: Arc<StdMutex<Vec<String>>>,
    }

    impl Scripted {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script),
                ..Default::default()
            })
        }

        fn edit(&self, f: impl FnOnce(&mut Script)) {
            f(&mut self.script.lock().unwrap());
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    struct ScriptedChannel {
        script: Script,
        closed: Arc<AtomicUsize>,
        requests: Arc<StdMutex<Vec<String>>>,
    }

    fn unscripted<T>() -> Result<T, ChannelError> {
        Err(ChannelError::Closed("unscripted call".into()))
    }

    #[async_trait]
    impl WalletChannel for ScriptedChannel {
        async fn authorize(&mut self, request: AuthorizeRequest) -> Result<AuthorizeResult, ChannelError> {
            self.requests
                .lock()
                .unwrap()
                .push(format!("authorize {} {}", request.identity.name, request.cluster));
            self.script.authorize.clone().unwrap_or_else(unscripted)
        }

        async fn deauthorize(&mut self, request: DeauthorizeRequest) -> Result<(), ChannelError> {
            self.requests
                .lock()
                .unwrap()
                .push(format!("deauthorize {}", request.auth_token));
            self.script.deauthorize.clone().unwrap_or_else(unscripted)
        }

        async fn sign_and_send(
            &mut self,
            request: SignAndSendRequest,
        ) -> Result<SignAndSendResult, ChannelError> {
            self.requests.lock().unwrap().push(format!(
                "sign {} {}",
                request.auth_token,
                request.payloads.join(",")
            ));
            self.script.sign.clone().unwrap_or_else(unscripted)
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl WalletTransport for Scripted {
        async fn open(&self) -> Result<Box<dyn WalletChannel>, ChannelError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedChannel {
                script: self.script.lock().unwrap().clone(),
                closed: Arc::clone(&self.closed),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    // ---------------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------------

    fn authorized(address: &str, token: Option<&str>) -> Result<AuthorizeResult, ChannelError> {
        Ok(AuthorizeResult {
            accounts: vec![AuthorizedAccount {
                address: address.into(),
                label: None,
            }],
            auth_token: token.map(Into::into),
            wallet_uri_base: None,
        })
    }

    fn signed(signatures: &[&str]) -> Result<SignAndSendResult, ChannelError> {
        Ok(SignAndSendResult {
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn manager_with(transport: Arc<dyn WalletTransport>, config: SessionConfig) -> SessionManager {
        SessionManager::new(transport, config)
    }

    fn scripted_manager(script: Script) -> (SessionManager, Arc<Scripted>) {
        let scripted = Scripted::new(script);
        let manager = manager_with(scripted.clone(), SessionConfig::default());
        (manager, scripted)
    }

    fn memory_manager(config: SessionConfig) -> (Arc<SessionManager>, MemoryWallet) {
        let wallet = MemoryWallet::new(config.cluster);
        let manager = Arc::new(manager_with(Arc::new(wallet.clone()), config));
        (manager, wallet)
    }

    async fn token_of(manager: &SessionManager) -> Option<String> {
        manager
            .session
            .lock()
            .await
            .token
            .as_ref()
            .map(|t| t.as_str().to_owned())
    }

    fn one_a() -> PublicIdentity {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x41;
        PublicIdentity::from_bytes(bytes)
    }

    async fn wait_until_busy(manager: &SessionManager) {
        let mut rx = manager.subscribe();
        rx.wait_for(|s| s.busy).await.unwrap();
    }

    // ---------------------------------------------------------------------------
    // connect
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn connect_decodes_identity_and_stores_token() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            ..Default::default()
        });

        let id = m.connect().await.unwrap();

        assert_eq!(id, one_a());
        assert_eq!(m.identity(), Some(one_a()));
        assert!(m.connected());
        assert!(!m.busy());
        assert!(m.snapshot().connected_since.is_some());
        assert_eq!(token_of(&m).await.as_deref(), Some("tok1"));
        assert_eq!(scripted.requests(), vec!["authorize Solticket App devnet"]);
        assert_eq!((scripted.opened(), scripted.closed()), (1, 1));
    }

    #[tokio::test]
    async fn connect_with_no_accounts_fails() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(Ok(AuthorizeResult {
                accounts: vec![],
                auth_token: Some("tok1".into()),
                wallet_uri_base: None,
            })),
            ..Default::default()
        });

        let err = m.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::AuthorizationFailed(_)), "got {err:?}");
        assert!(!m.connected());
        assert!(!m.busy());
        assert_eq!(token_of(&m).await, None);
        assert_eq!(scripted.closed(), 1);
    }

    #[tokio::test]
    async fn connect_without_token_fails() {
        for token in [None, Some("")] {
            let (m, _) = scripted_manager(Script {
                authorize: Some(authorized("QQ==", token)),
                ..Default::default()
            });
            let err = m.connect().await.unwrap_err();
            assert!(matches!(err, SessionError::AuthorizationFailed(_)));
            assert_eq!(m.identity(), None);
            assert_eq!(token_of(&m).await, None);
        }
    }

    #[tokio::test]
    async fn connect_with_undecodable_address_fails() {
        let (m, _) = scripted_manager(Script {
            authorize: Some(authorized("***", Some("tok1"))),
            ..Default::default()
        });
        let err = m.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationFailed(_)));
        assert!(!m.connected());
    }

    #[tokio::test]
    async fn declined_authorization_is_authorization_failure() {
        let (m, _) = scripted_manager(Script {
            authorize: Some(Err(WalletErrorResponse::new(
                codes::AUTHORIZATION_DECLINED,
                "user declined",
            )
            .into())),
            ..Default::default()
        });
        let err = m.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationFailed(ref msg) if msg.contains("declined")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn broken_channel_during_connect_is_channel_error() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(Err(ChannelError::Closed("socket reset".into()))),
            ..Default::default()
        });
        let err = m.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Channel(ChannelError::Closed(_))));
        assert!(!m.busy());
        assert_eq!(scripted.closed(), 1);
    }

    #[tokio::test]
    async fn unreachable_wallet_is_channel_error() {
        let (m, wallet) = memory_manager(SessionConfig::default());
        wallet.set_reachable(false);
        let err = m.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Channel(ChannelError::Unavailable(_))));
        assert!(!m.connected());
        assert!(!m.busy());
    }

    #[tokio::test]
    async fn failed_reconnect_keeps_previous_session() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            ..Default::default()
        });
        m.connect().await.unwrap();
        let before = m.snapshot();

        scripted.edit(|s| s.authorize = Some(Err(ChannelError::Closed("gone".into()))));
        assert!(m.connect().await.is_err());

        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn reconnect_without_accounts_keeps_previous_session() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            ..Default::default()
        });
        m.connect().await.unwrap();
        let before = m.snapshot();

        scripted.edit(|s| {
            s.authorize = Some(Ok(AuthorizeResult {
                accounts: vec![],
                auth_token: Some("tok2".into()),
                wallet_uri_base: None,
            }))
        });
        let err = m.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::AuthorizationFailed(_)));
        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn reconnect_timeout_keeps_previous_session() {
        let (m, wallet) = memory_manager(short_timeouts());
        m.connect().await.unwrap();
        let before = m.snapshot();
        let token = token_of(&m).await;
        wallet.set_hang(true);

        let err = m.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::Timeout { .. }));
        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await, token);
        assert_eq!(wallet.active_authorizations(), 1);
    }

    #[tokio::test]
    async fn rejected_reconnect_keeps_previous_session() {
        let config = SessionConfig {
            contention: ContentionPolicy::Reject,
            ..Default::default()
        };
        let (m, wallet) = memory_manager(config);
        m.connect().await.unwrap();
        let before = m.snapshot();
        let token = token_of(&m).await;
        wallet.set_latency(Duration::from_millis(100));

        let signing = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.sign_and_submit(b"ticket".to_vec()).await }
        });
        wait_until_busy(&m).await;

        assert!(matches!(m.connect().await, Err(SessionError::Busy)));
        assert!(signing.await.unwrap().is_ok());

        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await, token);
    }

    #[tokio::test]
    async fn reconnect_replaces_identity_and_token_together() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            ..Default::default()
        });
        m.connect().await.unwrap();

        scripted.edit(|s| s.authorize = Some(authorized("Qg==", Some("tok2"))));
        let id = m.connect().await.unwrap();

        assert_eq!(id.as_bytes()[31], 0x42);
        assert_eq!(m.identity(), Some(id));
        assert_eq!(token_of(&m).await.as_deref(), Some("tok2"));
    }

    // ---------------------------------------------------------------------------
    // disconnect
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn disconnect_when_disconnected_is_a_no_op() {
        let (m, scripted) = scripted_manager(Script::default());

        let report = m.disconnect().await;

        assert!(!report.deauthorized);
        assert!(report.error.is_none());
        assert_eq!(m.snapshot(), SessionSnapshot::default());
        assert_eq!(token_of(&m).await, None);
        assert_eq!(scripted.opened(), 0);
    }

    #[tokio::test]
    async fn disconnect_revokes_token() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            deauthorize: Some(Ok(())),
            ..Default::default()
        });
        m.connect().await.unwrap();

        let report = m.disconnect().await;

        assert!(report.deauthorized);
        assert!(report.error.is_none());
        assert!(!m.connected());
        assert!(!m.busy());
        assert_eq!(m.snapshot().connected_since, None);
        assert_eq!(token_of(&m).await, None);
        assert_eq!(scripted.requests()[1], "deauthorize tok1");
        assert_eq!((scripted.opened(), scripted.closed()), (2, 2));
    }

    #[tokio::test]
    async fn disconnect_clears_session_when_wallet_fails() {
        let (m, _) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            deauthorize: Some(Err(ChannelError::Closed("wallet crashed".into()))),
            ..Default::default()
        });
        m.connect().await.unwrap();

        let report = m.disconnect().await;

        assert!(!report.deauthorized);
        assert!(matches!(report.error, Some(SessionError::Channel(_))));
        assert_eq!(m.identity(), None);
        assert_eq!(token_of(&m).await, None);
        assert!(!m.busy());
    }

    #[tokio::test]
    async fn disconnect_twice_only_contacts_wallet_once() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            deauthorize: Some(Ok(())),
            ..Default::default()
        });
        m.connect().await.unwrap();
        m.disconnect().await;
        let report = m.disconnect().await;
        assert!(report.error.is_none());
        assert_eq!(scripted.opened(), 2);
    }

    // ---------------------------------------------------------------------------
    // sign_and_submit
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn sign_without_session_never_opens_channel() {
        let (m, scripted) = scripted_manager(Script {
            sign: Some(signed(&["sig1"])),
            ..Default::default()
        });

        let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();

        assert!(matches!(err, SessionError::NotConnected));
        assert!(!err.is_retryable());
        assert_eq!(scripted.opened(), 0);
        assert!(!m.busy());
    }

    #[tokio::test]
    async fn sign_returns_wallet_signature() {
        let (m, scripted) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            sign: Some(signed(&["sig1"])),
            ..Default::default()
        });
        m.connect().await.unwrap();
        let before = m.snapshot();

        let sig = m.sign_and_submit(&b"\x00\x01\x02"[..]).await.unwrap();

        assert_eq!(sig.as_str(), "sig1");
        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await.as_deref(), Some("tok1"));
        assert_eq!(scripted.requests()[1], "sign tok1 AAEC");
    }

    #[tokio::test]
    async fn signing_failure_leaves_session_alone() {
        let (m, _) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            sign: Some(Err(WalletErrorResponse::new(codes::NOT_SIGNED, "user declined").into())),
            ..Default::default()
        });
        m.connect().await.unwrap();
        let before = m.snapshot();

        let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::SigningFailed(ChannelError::Rejected { ref code, .. }) if code == codes::NOT_SIGNED
        ));
        assert!(!err.is_retryable());
        assert_eq!(m.snapshot(), before);
        assert_eq!(token_of(&m).await.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn broken_channel_while_signing_is_signing_failure() {
        let (m, _) = scripted_manager(Script {
            authorize: Some(authorized("QQ==", Some("tok1"))),
            sign: Some(Err(ChannelError::Closed("reset".into()))),
            ..Default::default()
        });
        m.connect().await.unwrap();
        let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();
        assert!(matches!(err, SessionError::SigningFailed(ChannelError::Closed(_))));
        assert!(m.connected());
    }

    #[tokio::test]
    async fn sign_requires_exactly_one_signature() {
        for sigs in [&[][..], &["a", "b"][..], &[""][..]] {
            let (m, _) = scripted_manager(Script {
                authorize: Some(authorized("QQ==", Some("tok1"))),
                sign: Some(signed(sigs)),
                ..Default::default()
            });
            m.connect().await.unwrap();
            let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();
            assert!(
                matches!(err, SessionError::SigningFailed(ChannelError::Protocol(_))),
                "{sigs:?} gave {err:?}"
            );
            assert!(m.connected());
        }
    }

    // ---------------------------------------------------------------------------
    // Timeouts
    // ---------------------------------------------------------------------------

    fn short_timeouts() -> SessionConfig {
        SessionConfig {
            timeouts: Timeouts::uniform(Duration::from_millis(50)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connect_timeout_leaves_state_and_closes_channel() {
        let (m, wallet) = memory_manager(short_timeouts());
        wallet.set_hang(true);

        let err = m.connect().await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Timeout {
                operation: Operation::Authorize,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(!m.connected());
        assert!(!m.busy());
        assert_eq!(wallet.channels_opened(), 1);
        assert_eq!(wallet.open_channels(), 0);
    }

    #[tokio::test]
    async fn sign_timeout_keeps_session() {
        let (m, wallet) = memory_manager(short_timeouts());
        let id = m.connect().await.unwrap();
        wallet.set_hang(true);

        let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Timeout {
                operation: Operation::SignAndSend,
                ..
            }
        ));
        assert_eq!(m.identity(), Some(id));
        assert!(token_of(&m).await.is_some());
        assert!(!m.busy());
        assert_eq!(wallet.open_channels(), 0);
    }

    #[tokio::test]
    async fn disconnect_timeout_still_clears() {
        let (m, wallet) = memory_manager(short_timeouts());
        m.connect().await.unwrap();
        wallet.set_hang(true);

        let report = m.disconnect().await;

        assert!(matches!(
            report.error,
            Some(SessionError::Timeout {
                operation: Operation::Deauthorize,
                ..
            })
        ));
        assert!(!m.connected());
        assert_eq!(token_of(&m).await, None);
        assert!(!m.busy());
        assert_eq!(wallet.open_channels(), 0);
    }

    #[tokio::test]
    async fn cancelled_connect_releases_busy_and_channel() {
        let config = SessionConfig {
            timeouts: Timeouts::none(),
            ..Default::default()
        };
        let (m, wallet) = memory_manager(config);
        wallet.set_hang(true);

        let task = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.connect().await }
        });
        wait_until_busy(&m).await;
        task.abort();
        let _ = task.await;

        assert!(!m.busy());
        assert!(!m.connected());
        assert_eq!(wallet.open_channels(), 0);
    }

    // ---------------------------------------------------------------------------
    // Concurrency
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn queue_policy_serialises_overlapping_calls() {
        let (m, wallet) = memory_manager(SessionConfig::default());
        wallet.set_latency(Duration::from_millis(30));

        let (a, b) = tokio::join!(m.connect(), m.connect());
        assert!(a.is_ok() && b.is_ok());

        let (s1, s2, d) = tokio::join!(
            m.sign_and_submit(b"one".to_vec()),
            m.sign_and_submit(b"two".to_vec()),
            m.disconnect(),
        );
        assert!(s1.is_ok() && s2.is_ok());
        assert!(d.deauthorized);

        assert_eq!(wallet.channels_opened(), 5);
        assert_eq!(wallet.max_concurrent_channels(), 1);
        assert!(!m.connected());
        assert!(!m.busy());
    }

    #[tokio::test]
    async fn reject_policy_refuses_overlapping_calls() {
        let config = SessionConfig {
            contention: ContentionPolicy::Reject,
            ..Default::default()
        };
        let (m, wallet) = memory_manager(config);
        wallet.set_latency(Duration::from_millis(200));

        let first = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.connect().await }
        });
        wait_until_busy(&m).await;

        assert!(matches!(m.connect().await, Err(SessionError::Busy)));
        assert!(!m.connected());

        let id = first.await.unwrap().unwrap();
        assert_eq!(id, wallet.public_identity());
        assert_eq!(wallet.channels_opened(), 1);

        let signing = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.sign_and_submit(b"ticket".to_vec()).await }
        });
        wait_until_busy(&m).await;

        assert!(matches!(
            m.sign_and_submit(b"other".to_vec()).await,
            Err(SessionError::Busy)
        ));
        assert_eq!(m.identity(), Some(id));
        assert!(signing.await.unwrap().is_ok());
        assert_eq!(wallet.max_concurrent_channels(), 1);
    }

    #[tokio::test]
    async fn disconnect_queues_under_reject_policy() {
        let config = SessionConfig {
            contention: ContentionPolicy::Reject,
            ..Default::default()
        };
        let (m, wallet) = memory_manager(config);
        m.connect().await.unwrap();
        wallet.set_latency(Duration::from_millis(100));

        let signing = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.sign_and_submit(b"ticket".to_vec()).await }
        });
        wait_until_busy(&m).await;

        let report = m.disconnect().await;

        assert!(report.deauthorized);
        assert!(signing.await.unwrap().is_ok());
        assert!(!m.connected());
        assert_eq!(wallet.max_concurrent_channels(), 1);
        assert_eq!(wallet.active_authorizations(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_after_disconnect_means_lock_is_free() {
        let config = SessionConfig {
            contention: ContentionPolicy::Reject,
            ..Default::default()
        };
        let (m, _wallet) = memory_manager(config);

        for _ in 0..200 {
            m.connect().await.unwrap();
            let mut rx = m.subscribe();

            let disconnecting = tokio::spawn({
                let m = Arc::clone(&m);
                async move { m.disconnect().await }
            });
            let idle = {
                let seen = rx.wait_for(|s| !s.connected()).await.unwrap();
                !seen.busy
            };
            if idle {
                assert!(m.connect().await.is_ok(), "idle manager refused connect");
            }
            disconnecting.await.unwrap();
        }
    }

    #[tokio::test]
    async fn disconnect_publishes_cleared_identity_as_busy() {
        let (m, wallet) = memory_manager(SessionConfig::default());
        m.connect().await.unwrap();
        wallet.set_latency(Duration::from_millis(50));
        let mut rx = m.subscribe();

        let disconnecting = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.disconnect().await }
        });
        let seen = rx.wait_for(|s| !s.connected()).await.unwrap().clone();
        assert!(seen.busy);

        rx.wait_for(|s| !s.busy).await.unwrap();
        assert!(m.session.try_lock().is_ok());
        assert!(disconnecting.await.unwrap().deauthorized);
    }

    #[tokio::test]
    async fn sign_queued_behind_disconnect_sees_no_session() {
        let (m, wallet) = memory_manager(SessionConfig::default());
        m.connect().await.unwrap();
        wallet.set_latency(Duration::from_millis(100));

        let disconnecting = tokio::spawn({
            let m = Arc::clone(&m);
            async move { m.disconnect().await }
        });
        wait_until_busy(&m).await;

        let err = m.sign_and_submit(b"ticket".to_vec()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert!(disconnecting.await.unwrap().deauthorized);
        assert!(wallet.submitted().is_empty());
    }

    // ---------------------------------------------------------------------------
    // Observation and end-to-end
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn subscribers_see_connected_flip() {
        use tokio_stream::StreamExt;

        let (m, wallet) = memory_manager(SessionConfig::default());
        let mut changes = m.changes();
        assert_eq!(changes.next().await, Some(SessionSnapshot::default()));

        let mut rx = m.subscribe();
        m.connect().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.identity, Some(wallet.public_identity()));
        assert!(!seen.busy);

        m.disconnect().await;
        assert!(!rx.borrow_and_update().connected());
    }

    #[tokio::test]
    async fn full_session_against_memory_wallet() {
        let (m, wallet) = memory_manager(SessionConfig::default());

        let id = m.connect().await.unwrap();
        assert_eq!(id, wallet.public_identity());
        assert_eq!(wallet.active_authorizations(), 1);

        let sig = m.sign_and_submit(b"admit one".to_vec()).await.unwrap();
        assert!(wallet.verify(b"admit one", sig.as_str()));
        assert_eq!(wallet.submitted(), vec![b"admit one".to_vec()]);

        let report = m.disconnect().await;
        assert!(report.deauthorized);
        assert_eq!(wallet.active_authorizations(), 0);

        assert!(matches!(
            m.sign_and_submit(b"admit two".to_vec()).await,
            Err(SessionError::NotConnected)
        ));
        assert_eq!(wallet.open_channels(), 0);
        assert_eq!(wallet.channels_opened(), 3);
    }

    #[tokio::test]
    async fn cluster_mismatch_fails_authorization() {
        let wallet = MemoryWallet::new(Cluster::MainnetBeta);
        let m = manager_with(Arc::new(wallet), SessionConfig::default());
        let err = m.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationFailed(ref msg) if msg.contains("cluster_not_supported")));
    }
}
