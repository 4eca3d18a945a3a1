//! Wallet session management for Solticket.
//!
//! The only stateful piece of the app: a [`SessionManager`] that negotiates
//! authorization with an external mobile wallet, holds the resulting token
//! and public identity in memory, and signs and submits one transaction at a
//! time through that session.
//!
//! The wallet itself is reached through the [`WalletTransport`] trait. Each
//! operation opens a fresh channel, performs exactly one request, and closes
//! the channel again. [`MemoryWallet`] is an in-process implementation used
//! by tests and the command-line caller.
//!
//! # Typical caller lifecycle
//!
//! ```text
//! let manager = SessionManager::new(transport, SessionConfig::from_env());
//!
//! manager.connect().await?;                       // wallet approval prompt
//! let sig = manager.sign_and_submit(payload).await?;
//! manager.disconnect().await;                     // never fails locally
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod memory;

pub use channel::{OpenChannel, WalletChannel, WalletTransport};
pub use config::{ContentionPolicy, SessionConfig, Timeouts};
pub use error::{ChannelError, Operation, SessionError};
pub use identity::{IdentityError, PublicIdentity, Signature, TransactionPayload};
pub use manager::{DisconnectReport, SessionManager, SessionSnapshot};
pub use memory::MemoryWallet;
pub use solticket_wallet_api as api;
