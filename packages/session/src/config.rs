//! Session configuration, populated from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use solticket_wallet_api::{AppIdentity, Cluster};
use tracing::warn;

/// What happens when an operation is requested while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentionPolicy {
    /// Wait for the in-flight operation, then run (FIFO).
    #[default]
    Queue,
    /// Fail at once with [`SessionError::Busy`](crate::SessionError::Busy).
    ///
    /// `disconnect` queues regardless.
    Reject,
}

impl FromStr for ContentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(ContentionPolicy::Queue),
            "reject" => Ok(ContentionPolicy::Reject),
            other => Err(format!("unknown contention policy '{other}': expected queue or reject")),
        }
    }
}

impl fmt::Display for ContentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentionPolicy::Queue => "queue",
            ContentionPolicy::Reject => "reject",
        })
    }
}

/// Per-operation round-trip limits. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub authorize: Option<Duration>,
    pub deauthorize: Option<Duration>,
    pub sign: Option<Duration>,
}

impl Timeouts {
    /// The same limit for every operation.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            authorize: Some(limit),
            deauthorize: Some(limit),
            sign: Some(limit),
        }
    }

    pub fn none() -> Self {
        Self {
            authorize: None,
            deauthorize: None,
            sign: None,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            authorize: Some(Duration::from_secs(120)),
            deauthorize: Some(Duration::from_secs(15)),
            sign: Some(Duration::from_secs(120)),
        }
    }
}

/// Runtime configuration for a [`SessionManager`](crate::SessionManager).
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SOLTICKET_APP_NAME` | `Solticket App` | Name shown in the wallet prompt |
/// | `SOLTICKET_APP_URI` | `https://solticket.io` | App origin shown in the wallet prompt |
/// | `SOLTICKET_APP_ICON` | `images/icon.png` | Icon path, relative to the URI |
/// | `SOLTICKET_CLUSTER` | `devnet` | `devnet`, `testnet` or `mainnet-beta` |
/// | `SOLTICKET_AUTHORIZE_TIMEOUT_SECS` | `120` | Connect limit; `0` disables |
/// | `SOLTICKET_DEAUTHORIZE_TIMEOUT_SECS` | `15` | Disconnect limit; `0` disables |
/// | `SOLTICKET_SIGN_TIMEOUT_SECS` | `120` | Sign-and-submit limit; `0` disables |
/// | `SOLTICKET_CONTENTION` | `queue` | `queue` or `reject` |
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Descriptor sent with every `authorize`.
    pub app_identity: AppIdentity,

    /// Cluster the session is authorized for.
    pub cluster: Cluster,

    pub timeouts: Timeouts,

    pub contention: ContentionPolicy,
}

impl SessionConfig {
    /// Populate config from environment variables, applying defaults where
    /// absent or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let app = defaults.app_identity;

        let app_identity = AppIdentity {
            name: lookup("SOLTICKET_APP_NAME").unwrap_or(app.name),
            uri: lookup("SOLTICKET_APP_URI").unwrap_or(app.uri),
            icon: lookup("SOLTICKET_APP_ICON").unwrap_or(app.icon),
        };

        let timeouts = Timeouts {
            authorize: timeout_var(
                &lookup,
                "SOLTICKET_AUTHORIZE_TIMEOUT_SECS",
                defaults.timeouts.authorize,
            ),
            deauthorize: timeout_var(
                &lookup,
                "SOLTICKET_DEAUTHORIZE_TIMEOUT_SECS",
                defaults.timeouts.deauthorize,
            ),
            sign: timeout_var(&lookup, "SOLTICKET_SIGN_TIMEOUT_SECS", defaults.timeouts.sign),
        };

        Self {
            app_identity,
            cluster: parsed_var(&lookup, "SOLTICKET_CLUSTER", defaults.cluster),
            timeouts,
            contention: parsed_var(&lookup, "SOLTICKET_CONTENTION", defaults.contention),
        }
    }
}

fn parsed_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(var = key, value = %raw, error = %e, "ignoring invalid value, using default");
            default
        }),
    }
}

fn timeout_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Option<Duration>,
) -> Option<Duration> {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!(var = key, value = %raw, error = %e, "ignoring invalid timeout, using default");
            default
        }
    }
}
