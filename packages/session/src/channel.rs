//! Wallet channel abstraction.
//!
//! The wallet is a separate application reached through a session-oriented
//! request/response transport. A [`WalletTransport`] opens a channel; a
//! [`WalletChannel`] performs requests on it. The session manager opens one
//! channel per operation, issues exactly one request, and closes it.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`MemoryWallet`](crate::MemoryWallet) | Tests, the CLI, offline development |
//! | platform bridge (host-provided) | Real wallet app on device |

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use solticket_wallet_api::{
    AuthorizeRequest, AuthorizeResult, DeauthorizeRequest, SignAndSendRequest, SignAndSendResult,
};
use tracing::debug;

use crate::error::ChannelError;

/// Opens channels to a wallet application.
///
/// Implementations must be `Send + Sync + 'static` so they can be held in an
/// `Arc<dyn WalletTransport>` by the session manager.
#[async_trait]
pub trait WalletTransport: Send + Sync + 'static {
    /// Associate with the wallet and return a live channel.
    async fn open(&self) -> Result<Box<dyn WalletChannel>, ChannelError>;
}

/// One open association with a wallet application.
#[async_trait]
pub trait WalletChannel: Send {
    async fn authorize(&mut self, request: AuthorizeRequest)
        -> Result<AuthorizeResult, ChannelError>;

    async fn deauthorize(&mut self, request: DeauthorizeRequest) -> Result<(), ChannelError>;

    async fn sign_and_send(
        &mut self,
        request: SignAndSendRequest,
    ) -> Result<SignAndSendResult, ChannelError>;

    /// Tear the association down. Must be idempotent and must not block.
    fn close(&mut self);
}

/// An open channel that is closed when dropped.
///
/// The only way the session manager obtains a channel. Because closing
/// happens in `Drop`, the channel is released on success, on error, and when
/// the surrounding future is dropped by a timeout or by the caller.
pub struct OpenChannel {
    inner: Box<dyn WalletChannel>,
}

impl OpenChannel {
    pub async fn open(transport: &dyn WalletTransport) -> Result<Self, ChannelError> {
        let inner = transport.open().await?;
        debug!("wallet channel opened");
        Ok(Self { inner })
    }
}

impl Deref for OpenChannel {
    type Target = dyn WalletChannel;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for OpenChannel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for OpenChannel {
    fn drop(&mut self) {
        self.inner.close();
        debug!("wallet channel closed");
    }
}
