//! Error body returned by the wallet when it refuses or fails a request.

use serde::{Deserialize, Serialize};

/// The error a wallet reports instead of a result.
///
/// ```json
/// { "code": "authorization_declined", "message": "user declined the request" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletErrorResponse {
    /// Machine-readable error code; see [`codes`].
    pub code: String,

    /// Human-readable description of the problem.
    pub message: String,
}

impl WalletErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Well-known wallet error codes.
///
/// | `code` | Raised by |
/// |--------|-----------|
/// | `authorization_declined` | `authorize` (user said no) |
/// | `auth_token_invalid` | `deauthorize`, `sign_and_send_transactions` |
/// | `cluster_not_supported` | `authorize` |
/// | `invalid_payloads` | `sign_and_send_transactions` |
/// | `not_signed` | `sign_and_send_transactions` (user said no) |
/// | `not_submitted` | `sign_and_send_transactions` (cluster refused) |
/// | `too_many_payloads` | `sign_and_send_transactions` |
pub mod codes {
    pub const AUTHORIZATION_DECLINED: &str = "authorization_declined";
    pub const AUTH_TOKEN_INVALID: &str = "auth_token_invalid";
    pub const CLUSTER_NOT_SUPPORTED: &str = "cluster_not_supported";
    pub const INVALID_PAYLOADS: &str = "invalid_payloads";
    pub const NOT_SIGNED: &str = "not_signed";
    pub const NOT_SUBMITTED: &str = "not_submitted";
    pub const TOO_MANY_PAYLOADS: &str = "too_many_payloads";
}
