use std::collections::HashSet;
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::peer::ConnectionId;

const TOKEN_BYTES: usize = 8;

/// Which viewer roles a session currently admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permissions {
    pub allow_pilots: bool,
    pub allow_observers: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions {
            allow_pilots: true,
            allow_observers: true,
        }
    }
}

/// Shared secrets supplied by the PC when it registers.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub password: String,
    pub guest_password: Option<String>,
}

pub struct Session {
    pub key: String,
    pub owner: Option<ConnectionId>,
    pub viewers: HashSet<ConnectionId>,
    pub secrets: Secrets,
    pub permissions: Permissions,
    /// Token sessions die with their owner, keyed sessions outlive it.
    pub ephemeral: bool,
    pub start_time: Instant,
}

impl Session {
    pub fn new(
        key: String,
        owner: ConnectionId,
        secrets: Secrets,
        permissions: Permissions,
        ephemeral: bool,
    ) -> Self {
        Session {
            key,
            owner: Some(owner),
            viewers: Default::default(),
            secrets,
            permissions,
            ephemeral,
            start_time: Instant::now(),
        }
    }
}

/// Lowercase hex token for server-created sessions.
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn permissions_wire_format() {
        let json = serde_json::to_string(&Permissions::default()).unwrap();
        assert_eq!(json, r#"{"allowPilots":true,"allowObservers":true}"#);

        let parsed: Permissions = serde_json::from_str(r#"{"allowObservers":false}"#).unwrap();
        assert!(parsed.allow_pilots);
        assert!(!parsed.allow_observers);
    }
}
