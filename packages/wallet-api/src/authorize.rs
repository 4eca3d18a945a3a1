//! Authorization types — `authorize` and `deauthorize`.
//!
//! An authorization binds the requesting app to one or more wallet accounts
//! on a given cluster. The wallet returns an opaque `auth_token` that the app
//! presents on every later call and revokes with `deauthorize`.

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::identity::AppIdentity;

/// Request body for `authorize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizeRequest {
    /// Descriptor shown in the wallet's approval prompt.
    pub identity: AppIdentity,

    /// Cluster the authorization is scoped to.
    pub cluster: Cluster,
}

/// An account the wallet authorized the app to use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizedAccount {
    /// Base64-encoded public key bytes.
    pub address: String,

    /// Optional user-facing label chosen in the wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Response body for `authorize`.
///
/// A well-behaved wallet returns at least one account and a token. Both are
/// modelled as possibly absent because the session manager must reject a
/// result that lacks either.
///
/// ```json
/// { "accounts": [{ "address": "QQ==" }], "auth_token": "tok1" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuthorizeResult {
    #[serde(default)]
    pub accounts: Vec<AuthorizedAccount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Base URI the wallet prefers for subsequent associations. OPTIONAL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_uri_base: Option<String>,
}

/// Request body for `deauthorize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeauthorizeRequest {
    pub auth_token: String,
}
