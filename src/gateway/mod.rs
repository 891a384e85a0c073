//! The publishing gateway: API keys, signed requests, byte quotas and
//! advisory repo ownership in front of a [`Publisher`].
//!
//! Authorization checks run in a fixed order (key, then signature, then
//! quota) and stop at the first failure.

mod keys;
mod publisher;

pub use keys::{KEY_ID_PREFIX, generate_key_id, generate_secret, request_payload, sign, verify};
pub use publisher::{NetworkPublisher, Publisher};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::error::{AuthRejection, Error, Result};
use crate::packet::Packet;
use crate::store::GatewayStore;
use crate::types::*;

/// Usage-log action recorded for every proxied publish.
pub const PUBLISH_ACTION: &str = "publish";

/// A freshly issued key. The secret is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub key_id: String,
    pub secret: String,
    pub quota_bytes: i64,
}

pub struct Gateway {
    store: Arc<dyn GatewayStore>,
    publisher: Arc<dyn Publisher>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        publisher: Arc<dyn Publisher>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // Key management

    pub fn issue_key(&self, owner: &str, quota_bytes: Option<i64>) -> Result<IssuedKey> {
        let quota_bytes = quota_bytes.unwrap_or(self.config.default_quota_bytes);
        if quota_bytes < 0 {
            return Err(Error::Config("quota must not be negative".to_string()));
        }

        let credential = ApiCredential {
            key_id: generate_key_id(),
            secret: generate_secret(),
            owner: owner.to_string(),
            quota_bytes,
            used_bytes: 0,
            status: KeyStatus::Active,
            created_at: Utc::now(),
        };
        self.store.create_credential(&credential)?;
        tracing::info!(
            "Issued key {} for {} ({} bytes)",
            credential.key_id,
            owner,
            quota_bytes
        );

        Ok(IssuedKey {
            key_id: credential.key_id,
            secret: credential.secret,
            quota_bytes,
        })
    }

    pub fn revoke_key(&self, key_id: &str) -> Result<bool> {
        let revoked = self.store.set_credential_status(key_id, KeyStatus::Revoked)?;
        if revoked {
            tracing::info!("Revoked key {key_id}");
        }
        Ok(revoked)
    }

    pub fn credential(&self, key_id: &str) -> Result<Option<ApiCredential>> {
        self.store.get_credential(key_id)
    }

    pub fn list_credentials(&self) -> Result<Vec<ApiCredential>> {
        self.store.list_credentials()
    }

    pub fn usage(&self, key_id: &str) -> Result<Vec<UsageLogEntry>> {
        self.store.list_usage(key_id)
    }

    // Authorization

    /// Checks that the key exists, is active, and signed `payload`.
    pub fn authenticate(
        &self,
        key_id: &str,
        signature: &str,
        payload: &[u8],
    ) -> Result<ApiCredential> {
        let credential = match self.store.get_credential(key_id)? {
            Some(c) if c.is_active() => c,
            _ => return Err(self.deny(key_id, AuthRejection::InvalidKey)),
        };
        if !verify(&credential.secret, payload, signature) {
            return Err(self.deny(key_id, AuthRejection::SignatureMismatch));
        }
        Ok(credential)
    }

    /// [`Gateway::authenticate`], then refuses keys whose quota is used up.
    pub fn authorize(&self, key_id: &str, signature: &str, payload: &[u8]) -> Result<ApiCredential> {
        let credential = self.authenticate(key_id, signature, payload)?;
        if credential.quota_exhausted() {
            return Err(self.deny(key_id, AuthRejection::QuotaExceeded));
        }
        Ok(credential)
    }

    fn deny(&self, key_id: &str, rejection: AuthRejection) -> Error {
        tracing::warn!("Denied {key_id}: {}", rejection.reason());
        Error::Authorization(rejection)
    }

    // Publishing

    /// Reserves the packet's serialized size against the key's quota, claims
    /// its repo name, then forwards it.
    ///
    /// The reservation is final: a post the network refuses or never receives
    /// still counts against the quota.
    pub fn proxy_publish(&self, key_id: &str, packet: &Packet, channel: &str) -> Result<bool> {
        let wire = packet.to_wire()?;
        let bytes = i64::try_from(wire.len()).unwrap_or(i64::MAX);

        if !self
            .store
            .record_publish(key_id, bytes, &packet.repo_name, PUBLISH_ACTION)?
        {
            let rejection = match self.store.get_credential(key_id)? {
                Some(c) if c.is_active() => AuthRejection::QuotaExceeded,
                _ => AuthRejection::InvalidKey,
            };
            return Err(self.deny(key_id, rejection));
        }

        match self.publisher.publish(packet, channel) {
            Ok(accepted) => {
                if !accepted {
                    tracing::warn!("{channel} refused {} from {key_id}", packet.repo_name);
                }
                Ok(accepted)
            }
            Err(e) => {
                tracing::warn!("Publishing {} for {key_id} failed: {e}", packet.repo_name);
                Ok(false)
            }
        }
    }

    /// Authorizes a signed publish request and proxies it. `channel` falls
    /// back to the configured default.
    pub fn handle_publish(
        &self,
        key_id: &str,
        signature: &str,
        payload: &[u8],
        packet: &Packet,
        channel: Option<&str>,
    ) -> Result<bool> {
        self.authorize(key_id, signature, payload)?;
        let channel = channel.unwrap_or(&self.config.default_channel);
        self.proxy_publish(key_id, packet, channel)
    }

    // Ownership bookkeeping. Nothing here is visible to the network.

    pub fn list_owned_repos(&self, key_id: &str) -> Result<Vec<RepoOwnership>> {
        self.store.list_owned_repos(key_id)
    }

    pub fn release_repo(&self, key_id: &str, repo_name: &str) -> Result<bool> {
        self.store.release_repo(key_id, repo_name)
    }

    /// Moves a claim to a new name. Fails with [`Error::OwnershipConflict`],
    /// changing nothing, if the key already owns `new_name`.
    pub fn rename_repo(&self, key_id: &str, old_name: &str, new_name: &str) -> Result<bool> {
        self.store.rename_repo(key_id, old_name, new_name)
    }
}
