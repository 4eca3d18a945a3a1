//! Network cluster labels understood by wallets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The cluster an authorization is scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Cluster {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
}

impl Cluster {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cluster::Devnet => "devnet",
            Cluster::Testnet => "testnet",
            Cluster::MainnetBeta => "mainnet-beta",
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by [`Cluster::from_str`] for an unrecognised label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cluster '{0}': expected devnet, testnet or mainnet-beta")]
pub struct ClusterParseError(pub String);

impl FromStr for Cluster {
    type Err = ClusterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "devnet" => Ok(Cluster::Devnet),
            "testnet" => Ok(Cluster::Testnet),
            "mainnet-beta" => Ok(Cluster::MainnetBeta),
            other => Err(ClusterParseError(other.to_string())),
        }
    }
}
