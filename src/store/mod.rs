mod schema;
mod sqlite;

pub use sqlite::{SqliteCommitStore, SqliteGatewayStore};

use crate::error::Result;
use crate::types::*;

/// CommitStore is the local mirror of commits seen on the network.
///
/// Records are append-only: there is no update or delete.
pub trait CommitStore: Send + Sync {
    fn initialize(&self) -> Result<()>;

    /// Inserts the record unless its `message_id` is already present.
    /// Returns whether a row was written.
    fn insert_commit(&self, record: &CommitRecord) -> Result<bool>;
    fn get_commit(&self, message_id: &str) -> Result<Option<CommitRecord>>;
    /// Newest first by `created_at`, optionally restricted to one repo name.
    fn list_commits(&self, repo_name: Option<&str>) -> Result<Vec<CommitRecord>>;
    fn count_commits(&self) -> Result<i64>;
}

/// GatewayStore holds API keys, usage accounting and repo ownership.
pub trait GatewayStore: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Credential operations
    fn create_credential(&self, credential: &ApiCredential) -> Result<()>;
    fn get_credential(&self, key_id: &str) -> Result<Option<ApiCredential>>;
    fn list_credentials(&self) -> Result<Vec<ApiCredential>>;
    fn set_credential_status(&self, key_id: &str, status: KeyStatus) -> Result<bool>;

    /// Reserves `bytes` of quota, appends a usage row and claims `repo_name`
    /// for the key, as one transaction.
    ///
    /// The reservation only applies while the key is active and under quota;
    /// otherwise nothing is written and `false` is returned.
    fn record_publish(&self, key_id: &str, bytes: i64, repo_name: &str, action: &str)
    -> Result<bool>;
    fn list_usage(&self, key_id: &str) -> Result<Vec<UsageLogEntry>>;

    // Ownership operations
    fn list_owned_repos(&self, key_id: &str) -> Result<Vec<RepoOwnership>>;
    fn release_repo(&self, key_id: &str, repo_name: &str) -> Result<bool>;
    /// Fails with `OwnershipConflict` if the key already owns `new_name`.
    /// Returns `false` if the key does not own `old_name`.
    fn rename_repo(&self, key_id: &str, old_name: &str, new_name: &str) -> Result<bool>;
}
