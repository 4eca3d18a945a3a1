//! In-process wallet implementation.
//!
//! [`MemoryWallet`] answers the wallet protocol from memory with a real
//! Ed25519 key. Tokens are UUIDv7 strings held in a set; signatures are
//! base58-encoded Ed25519 signatures over the raw payload bytes. Nothing is
//! broadcast anywhere: "submitted" payloads are simply recorded.
//!
//! Knobs on the wallet let tests model a slow, hung, unreachable, or
//! uncooperative wallet app, and counters expose how the session manager
//! used the channel.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use solticket_wallet_api::error::codes;
use solticket_wallet_api::{
    AuthorizeRequest, AuthorizeResult, AuthorizedAccount, Cluster, DeauthorizeRequest,
    SignAndSendRequest, SignAndSendResult, WalletErrorResponse,
};
use uuid::Uuid;

use crate::channel::{WalletChannel, WalletTransport};
use crate::error::ChannelError;
use crate::identity::PublicIdentity;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct State {
    tokens: HashSet<String>,
    submitted: Vec<Vec<u8>>,

    latency: Duration,
    hang: bool,
    reachable: bool,
    approve_authorization: bool,
    approve_signing: bool,

    opened: usize,
    open: usize,
    max_open: usize,
}

impl State {
    fn new() -> Self {
        Self {
            tokens: HashSet::new(),
            submitted: Vec::new(),
            latency: Duration::ZERO,
            hang: false,
            reachable: true,
            approve_authorization: true,
            approve_signing: true,
            opened: 0,
            open: 0,
            max_open: 0,
        }
    }
}

struct Inner {
    cluster: Cluster,
    label: String,
    signing_key: SigningKey,
    state: RwLock<State>,
}

impl Inner {
    /// Simulate the wallet app taking its time, or never answering.
    async fn respond(&self) {
        let (latency, hang) = {
            let state = self.state.read().unwrap();
            (state.latency, state.hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryWallet
// ---------------------------------------------------------------------------

/// Thread-safe, in-memory implementation of [`WalletTransport`].
///
/// Cheap to clone; clones share the same key, tokens, and counters.
#[derive(Clone)]
pub struct MemoryWallet {
    inner: Arc<Inner>,
}

impl MemoryWallet {
    /// A wallet with a fresh key that serves `cluster`.
    pub fn new(cluster: Cluster) -> Self {
        Self::with_key(cluster, SigningKey::generate(&mut OsRng))
    }

    /// A wallet whose key is derived from a fixed 32-byte seed.
    pub fn from_seed(cluster: Cluster, seed: &[u8; 32]) -> Self {
        Self::with_key(cluster, SigningKey::from_bytes(seed))
    }

    fn with_key(cluster: Cluster, signing_key: SigningKey) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster,
                label: "memory wallet".into(),
                signing_key,
                state: RwLock::new(State::new()),
            }),
        }
    }

    /// The account this wallet authorizes.
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity::from_bytes(self.inner.signing_key.verifying_key().to_bytes())
    }

    /// Check a signature returned by `sign_and_send` against `payload`.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(raw) = bs58::decode(signature).into_vec() else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(raw) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&bytes);
        self.inner
            .signing_key
            .verifying_key()
            .verify(payload, &sig)
            .is_ok()
    }

    // --- Behaviour knobs -----------------------------------------------------

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.state.write().unwrap().latency = latency;
    }

    /// Never answer any request (channels still open).
    pub fn set_hang(&self, hang: bool) {
        self.inner.state.write().unwrap().hang = hang;
    }

    /// When false, opening a channel fails as if the wallet app were absent.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state.write().unwrap().reachable = reachable;
    }

    /// When false, the user "declines" every authorization prompt.
    pub fn set_approve_authorization(&self, approve: bool) {
        self.inner.state.write().unwrap().approve_authorization = approve;
    }

    /// When false, the user "declines" every signing prompt.
    pub fn set_approve_signing(&self, approve: bool) {
        self.inner.state.write().unwrap().approve_signing = approve;
    }

    // --- Counters ------------------------------------------------------------

    /// Total channels opened so far.
    pub fn channels_opened(&self) -> usize {
        self.inner.state.read().unwrap().opened
    }

    /// Channels currently open.
    pub fn open_channels(&self) -> usize {
        self.inner.state.read().unwrap().open
    }

    /// Highest number of channels that were open at the same time.
    pub fn max_concurrent_channels(&self) -> usize {
        self.inner.state.read().unwrap().max_open
    }

    /// Tokens issued and not yet revoked.
    pub fn active_authorizations(&self) -> usize {
        self.inner.state.read().unwrap().tokens.len()
    }

    /// Every payload signed so far, in order.
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.inner.state.read().unwrap().submitted.clone()
    }
}

#[async_trait]
impl WalletTransport for MemoryWallet {
    async fn open(&self) -> Result<Box<dyn WalletChannel>, ChannelError> {
        let mut state = self.inner.state.write().unwrap();
        if !state.reachable {
            return Err(ChannelError::Unavailable("no wallet app answered".into()));
        }
        state.opened += 1;
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        Ok(Box::new(MemoryChannel {
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

struct MemoryChannel {
    inner: Arc<Inner>,
    closed: bool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed("channel already closed".into()));
        }
        Ok(())
    }
}

fn rejected(code: &str, message: impl Into<String>) -> ChannelError {
    WalletErrorResponse::new(code, message).into()
}

#[async_trait]
impl WalletChannel for MemoryChannel {
    async fn authorize(
        &mut self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeResult, ChannelError> {
        self.ensure_open()?;
        self.inner.respond().await;

        if request.cluster != self.inner.cluster {
            return Err(rejected(
                codes::CLUSTER_NOT_SUPPORTED,
                format!("wallet serves {}, not {}", self.inner.cluster, request.cluster),
            ));
        }

        let mut state = self.inner.state.write().unwrap();
        if !state.approve_authorization {
            return Err(rejected(
                codes::AUTHORIZATION_DECLINED,
                format!("user declined {}", request.identity.name),
            ));
        }

        let token = Uuid::now_v7().to_string();
        state.tokens.insert(token.clone());

        let public_key = self.inner.signing_key.verifying_key().to_bytes();
        Ok(AuthorizeResult {
            accounts: vec![AuthorizedAccount {
                address: STANDARD.encode(public_key),
                label: Some(self.inner.label.clone()),
            }],
            auth_token: Some(token),
            wallet_uri_base: None,
        })
    }

    async fn deauthorize(&mut self, request: DeauthorizeRequest) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.inner.respond().await;

        let mut state = self.inner.state.write().unwrap();
        if !state.tokens.remove(&request.auth_token) {
            return Err(rejected(codes::AUTH_TOKEN_INVALID, "unknown auth token"));
        }
        Ok(())
    }

    async fn sign_and_send(
        &mut self,
        request: SignAndSendRequest,
    ) -> Result<SignAndSendResult, ChannelError> {
        self.ensure_open()?;
        self.inner.respond().await;

        let mut state = self.inner.state.write().unwrap();
        if !state.tokens.contains(&request.auth_token) {
            return Err(rejected(codes::AUTH_TOKEN_INVALID, "unknown auth token"));
        }
        if request.payloads.is_empty() {
            return Err(rejected(codes::INVALID_PAYLOADS, "no payloads supplied"));
        }

        let mut decoded = Vec::with_capacity(request.payloads.len());
        for (i, payload) in request.payloads.iter().enumerate() {
            let bytes = STANDARD.decode(payload).map_err(|e| {
                rejected(codes::INVALID_PAYLOADS, format!("payload {i} is not base64: {e}"))
            })?;
            decoded.push(bytes);
        }

        if !state.approve_signing {
            return Err(rejected(codes::NOT_SIGNED, "user declined to sign"));
        }

        let signatures = decoded
            .iter()
            .map(|bytes| {
                let sig = self.inner.signing_key.sign(bytes);
                bs58::encode(sig.to_bytes()).into_string()
            })
            .collect();
        state.submitted.extend(decoded);

        Ok(SignAndSendResult { signatures })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.state.write().unwrap().open -= 1;
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
