//! Client identity and tier resolution.

use crate::config::KeyConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Client classification governing rate ceilings and administrative privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// No recognised API key; identified by network address.
    #[serde(alias = "none")]
    Public,
    Demo,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::Demo => "demo",
            Tier::Premium => "premium",
        }
    }

    /// Premium clients may force a cache refresh and use administrative operations.
    pub fn is_premium(&self) -> bool {
        matches!(self, Tier::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking, as far as admission control is concerned.
///
/// `id` is safe to embed in store keys: keyed clients are represented by a digest of the
/// key, never the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    id: String,
    tier: Tier,
}

impl ClientIdentity {
    /// Resolve the identity for a request.
    ///
    /// Keys that match neither the demo nor the premium prefix do not earn a tier, so the
    /// caller falls back to address-based identity; rotating junk keys cannot dodge the
    /// public ceiling.
    pub fn resolve(api_key: Option<&str>, remote_addr: IpAddr, keys: &KeyConfig) -> Self {
        let key = api_key.map(str::trim).filter(|k| !k.is_empty());
        match key.map(|k| (k, classify_key(k, keys))) {
            Some((k, tier @ (Tier::Demo | Tier::Premium))) => {
                Self { id: format!("key:{}", digest_key(k)), tier }
            }
            _ => Self::from_addr(remote_addr),
        }
    }

    /// Address-based public identity.
    pub fn from_addr(remote_addr: IpAddr) -> Self {
        Self { id: format!("ip:{}", remote_addr), tier: Tier::Public }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.tier)
    }
}

/// Classify an API key by its format prefix.
pub fn classify_key(key: &str, keys: &KeyConfig) -> Tier {
    if key.starts_with(&keys.premium_prefix) {
        Tier::Premium
    } else if key.starts_with(&keys.demo_prefix) {
        Tier::Demo
    } else {
        Tier::Public
    }
}

fn digest_key(key: &str) -> String {
    let hash = blake3::hash(key.as_bytes());
    hash.to_hex().as_str()[..32].to_string()
}
