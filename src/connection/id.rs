//! Connection identifiers.

use std::borrow::Borrow;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes behind every identifier (96 bits).
pub const ID_BYTES: usize = 12;

/// Opaque, unguessable identifier of a live connection.
///
/// Hex encoded, so every id is `2 * ID_BYTES` characters long. Cloning is
/// cheap; the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Generate a new identifier from the operating system's secure RNG.
    ///
    /// # Panics
    /// If the random source cannot supply the bytes. The process cannot
    /// hand out identifiers safely without it.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
            panic!("secure random source unavailable: {err}");
        }
        Self(hex::encode(bytes).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
