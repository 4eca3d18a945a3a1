//! Error taxonomy for wallet session operations.
//!
//! [`ChannelError`] describes what went wrong at the wallet channel
//! boundary. [`SessionError`] is what callers of the
//! [`SessionManager`](crate::SessionManager) see: channel failures are
//! classified per operation so the UI can tell a retryable hiccup from a
//! condition that needs a different action.

use std::fmt;
use std::time::Duration;

use solticket_wallet_api::WalletErrorResponse;
use thiserror::Error;

use crate::identity::IdentityError;

/// The three round trips the session manager performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Authorize,
    Deauthorize,
    SignAndSend,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Authorize => "authorize",
            Operation::Deauthorize => "deauthorize",
            Operation::SignAndSend => "sign_and_send",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

/// Failures raised by a [`WalletTransport`](crate::WalletTransport) or an open
/// [`WalletChannel`](crate::WalletChannel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No channel could be opened (wallet app missing or not answering).
    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    /// The channel broke while a request was outstanding.
    #[error("wallet channel closed: {0}")]
    Closed(String),

    /// The wallet answered with an error body.
    #[error("wallet rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The wallet answered with something the protocol does not allow.
    #[error("malformed wallet response: {0}")]
    Protocol(String),
}

impl From<WalletErrorResponse> for ChannelError {
    fn from(e: WalletErrorResponse) -> Self {
        ChannelError::Rejected {
            code: e.code,
            message: e.message,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors returned by [`SessionManager`](crate::SessionManager) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The wallet declined, or returned no usable account or token.
    #[error("wallet authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Signing was attempted without an authorized session.
    #[error("no wallet session is connected")]
    NotConnected,

    /// The wallet failed or refused to sign and submit.
    #[error("signing failed: {0}")]
    SigningFailed(#[source] ChannelError),

    /// The channel could not be opened or broke mid-operation.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The round trip exceeded its configured limit.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: Operation, after: Duration },

    /// Another operation held the channel and the policy is to reject.
    #[error("another wallet operation is already in flight")]
    Busy,
}

impl SessionError {
    /// Whether issuing the same call again later may succeed.
    ///
    /// `SigningFailed` is not retryable: the wallet may already have
    /// broadcast the transaction, so the caller must build a fresh one.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::AuthorizationFailed(_)
            | SessionError::Channel(_)
            | SessionError::Timeout { .. }
            | SessionError::Busy => true,
            SessionError::NotConnected | SessionError::SigningFailed(_) => false,
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(e: IdentityError) -> Self {
        SessionError::AuthorizationFailed(e.to_string())
    }
}
