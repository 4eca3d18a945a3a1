//! Application identity descriptor shown in the wallet's approval prompt.

use serde::{Deserialize, Serialize};

/// Identifies the requesting application to the wallet.
///
/// The wallet renders these fields when asking the user to approve an
/// authorization. `icon` is resolved relative to `uri`.
///
/// ```json
/// { "name": "Solticket App", "uri": "https://solticket.io", "icon": "images/icon.png" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub uri: String,
    pub icon: String,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            icon: icon.into(),
        }
    }

    /// The descriptor the Solticket app presents to wallets.
    pub fn solticket() -> Self {
        Self::new("Solticket App", "https://solticket.io", "images/icon.png")
    }
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self::solticket()
    }
}
