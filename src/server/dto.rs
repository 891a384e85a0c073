use serde::{Deserialize, Serialize};

use crate::packet::Packet;
use crate::types::CommitRecord;

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub packet: Packet,
    /// Defaults to the gateway's configured channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub accepted: bool,
    pub repo_name: String,
    pub channel: String,
    /// Bytes charged against the key's quota.
    pub bytes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRepoRequest {
    pub new_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRepoResponse {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCommitsParams {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitDetail {
    #[serde(flatten)]
    pub record: CommitRecord,
    pub files: Vec<String>,
}
