//! Link configuration and the per-session option overlay returned by the
//! credential store.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::accounting::AcctAttr;
use crate::wire::AuthProto;

/// Static configuration for one link. Loading (TOML, flags, ...) is the
/// application's job; everything here has a usable default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Demand authentication from the peer before opening the network phase.
    pub auth_required: bool,
    /// Authentication protocols we are willing to negotiate, in order of
    /// preference.
    pub allowed_auth: Vec<AuthProto>,
    /// Identity we present when the peer demands authentication from us.
    pub username: String,
    pub password: String,
    /// MRU we advertise. The default is never put on the wire.
    pub mru: u16,
    /// Largest MRU we let the peer claim before Nak-ing it down.
    pub mru_max: u16,
    /// ACCM we advertise. The all-ones default is never put on the wire.
    pub asyncmap: u32,
    /// Fixed magic number; None rolls a fresh one per link.
    pub magic: Option<u32>,
    /// Accept the peer's multilink options (MRRU, short sequence numbers,
    /// endpoint discriminator).
    pub multilink: bool,
    /// Interim accounting interval in seconds.
    pub interim_accounting: u32,
    /// Address we claim in IPCP.
    pub our_ip: Ipv4Addr,
    /// Addresses handed out to peers; the link takes the first.
    pub peer_ip_pool: Vec<Ipv4Addr>,
    /// NAS-Identifier asserted in accounting records.
    pub nas_identifier: String,
    /// Extra attributes attached to every accounting record (circuit ids,
    /// line rates and other carrier data).
    pub accounting: Vec<AcctAttr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_required: false,
            allowed_auth: Vec::new(),
            username: String::new(),
            password: String::new(),
            mru: 1500,
            mru_max: 1500,
            asyncmap: 0xffff_ffff,
            magic: None,
            multilink: false,
            interim_accounting: 10,
            our_ip: Ipv4Addr::UNSPECIFIED,
            peer_ip_pool: Vec::new(),
            nas_identifier: String::new(),
            accounting: Vec::new(),
        }
    }
}

/// Well-known override keys in [`SessionOpts`].
pub mod keys {
    /// Accounting username override.
    pub const USERNAME: &str = "username";
    /// Peer address override, beats the pool.
    pub const PEER_IP: &str = "peer_ip";
    /// Interim interval override, seconds.
    pub const INTERIM_ACCOUNTING: &str = "interim_accounting";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    Str(String),
    U32(u32),
    Ipv4(Ipv4Addr),
    Flag(bool),
}

/// Per-session overrides from the credential store, merged over the base
/// config key by key, last write winning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOpts {
    entries: Vec<(String, OptValue)>,
}

impl SessionOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: OptValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Overlay `other`; its values win.
    pub fn merge_from(&mut self, other: &SessionOpts) {
        for (key, value) in &other.entries {
            self.set(key, value.clone());
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(OptValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn u32(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(OptValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn ipv4(&self, key: &str) -> Option<Ipv4Addr> {
        match self.get(key) {
            Some(OptValue::Ipv4(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Valid credentials, with any per-user overrides from the store.
    Success(SessionOpts),
    Fail,
}

/// Credential store the link consults when verifying a peer. Implementations
/// must not block; slow backends belong behind their own queue.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, peer_id: &[u8], passwd: &[u8]) -> AuthResult;
}
