//! Content-addressed identities for shows and episodes.
//!
//! A show is identified by the SHA-256 of its feed URL, an episode by the
//! SHA-256 of its guid followed directly by the feed URL. Both render as 64
//! lower-case hex characters and are stable across processes and releases.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lower-case hex SHA-256 digest used as a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(key: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(key.as_bytes())))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of the show published at `feed_url`.
pub fn show_id(feed_url: &str) -> Identity {
    Identity::digest(feed_url)
}

/// Identity of the episode `guid` within the show at `feed_url`.
pub fn episode_id(guid: &str, feed_url: &str) -> Identity {
    let mut key = String::with_capacity(guid.len() + feed_url.len());
    key.push_str(guid);
    key.push_str(feed_url);
    Identity::digest(&key)
}
