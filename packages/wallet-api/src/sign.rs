//! Signing types — `sign_and_send_transactions`.

use serde::{Deserialize, Serialize};

/// Request body for `sign_and_send_transactions`.
///
/// Payloads are opaque to the app's session layer; the wallet decodes,
/// signs, and submits them to the cluster named at authorization time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignAndSendRequest {
    /// Token from a prior `authorize`; the wallet re-validates it.
    pub auth_token: String,

    /// Base64-encoded transaction payloads.
    pub payloads: Vec<String>,
}

/// Response body for `sign_and_send_transactions`.
///
/// One signature per submitted payload, in request order. Signatures are
/// already encoded by the wallet and are passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SignAndSendResult {
    #[serde(default)]
    pub signatures: Vec<String>,
}
