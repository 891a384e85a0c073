use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::{Packet, inflate, unpack};

/// A commit found on the network and mirrored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// `<channel>:<article>`; the deduplication key.
    pub message_id: String,
    pub repo_name: String,
    pub author: String,
    /// UTC, RFC 3339 with microseconds, so string order is time order.
    pub created_at: String,
    pub message: String,
    pub integrity_digest: String,
    /// zlib-compressed article text exactly as fetched, headers included.
    #[serde(skip)]
    pub raw_packet: Vec<u8>,
    pub ingested_at: DateTime<Utc>,
}

impl CommitRecord {
    /// The archived article text.
    pub fn raw_text(&self) -> Result<String> {
        let raw = inflate(&self.raw_packet)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Decodes the packet out of the archived article.
    pub fn packet(&self) -> Result<Packet> {
        Ok(unpack(&self.raw_text()?)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
}

impl KeyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    /// Anything that is not literally `active` denies access.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "active" {
            Self::Active
        } else {
            Self::Revoked
        }
    }
}

/// A gateway API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub key_id: String,
    #[serde(skip)]
    pub secret: String,
    pub owner: String,
    pub quota_bytes: i64,
    pub used_bytes: i64,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

impl ApiCredential {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    #[must_use]
    pub fn quota_exhausted(&self) -> bool {
        self.used_bytes >= self.quota_bytes
    }

    #[must_use]
    pub fn remaining_bytes(&self) -> i64 {
        (self.quota_bytes - self.used_bytes).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: i64,
    pub key_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub bytes_transferred: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoOwnership {
    pub key_id: String,
    pub repo_name: String,
    pub claimed_at: DateTime<Utc>,
}
