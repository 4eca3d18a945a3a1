//! Request and response types for the mobile wallet channel.
//!
//! This crate encodes the wallet protocol contract as Rust types. It has no
//! I/O: a transport implementation moves these values to and from the
//! wallet application, and the session manager in `solticket-session`
//! interprets them.
//!
//! # Operations covered
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | `authorize` | [`AuthorizeRequest`] | [`AuthorizeResult`] |
//! | `deauthorize` | [`DeauthorizeRequest`] | `()` |
//! | `sign_and_send_transactions` | [`SignAndSendRequest`] | [`SignAndSendResult`] |
//!
//! Any operation may instead fail with a [`WalletErrorResponse`].

pub mod authorize;
pub mod cluster;
pub mod error;
pub mod identity;
pub mod sign;

pub use authorize::{AuthorizeRequest, AuthorizeResult, AuthorizedAccount, DeauthorizeRequest};
pub use cluster::{Cluster, ClusterParseError};
pub use error::WalletErrorResponse;
pub use identity::AppIdentity;
pub use sign::{SignAndSendRequest, SignAndSendResult};
