//! Commit packets: the JSON document carrying one directory snapshot.
//!
//! A packet is built from a [`FileSource`], serialized as a single line of
//! JSON, and can be recovered from any text that embeds it (a full article
//! with headers, a quoted reply, ...). Wire keys are short (`v`, `repo`,
//! `msg`, `ts`, `sig`) and shared with every other Deep Sea encoder.

mod blob;
mod path;
mod source;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use blob::{compress, decode_blob, encode_blob, inflate};
pub use path::{EXCLUDED_DIRS, is_excluded_dir, normalize_relative_path};
pub use source::{DirectorySource, FileSource};

use crate::error::Result;

/// The only packet version this crate reads or writes.
pub const SCHEMA_VERSION: &str = "0.2.0";
pub const PACKET_KIND: &str = "commit";
/// Subject prefix of every published packet; scans use it as a cheap pre-filter.
pub const PACKET_MARKER: &str = "[DEEPSEA]";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no JSON object found")]
    NoJsonObject,
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unsupported packet version: {0}")]
    UnsupportedVersion(String),
    #[error("unsupported packet type: {0}")]
    UnsupportedKind(String),
    #[error("invalid file blob: {0}")]
    InvalidBlob(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "v")]
    pub schema_version: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "repo")]
    pub repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(rename = "ts")]
    pub created_at: String,
    pub files: BTreeMap<String, String>,
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub integrity_digest: Option<String>,
}

impl Packet {
    /// Serialized form of every field except the digest.
    ///
    /// Files are keyed by a `BTreeMap`, so the text is independent of the
    /// order in which the tree was walked.
    pub fn canonical_text(&self) -> std::result::Result<String, serde_json::Error> {
        let unsigned = Packet {
            integrity_digest: None,
            ..self.clone()
        };
        serde_json::to_string(&unsigned)
    }

    pub fn compute_digest(&self) -> std::result::Result<String, serde_json::Error> {
        let canonical = self.canonical_text()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// True when the attached digest matches the packet's canonical text.
    #[must_use]
    pub fn digest_matches(&self) -> bool {
        match (&self.integrity_digest, self.compute_digest()) {
            (Some(attached), Ok(computed)) => attached.eq_ignore_ascii_case(&computed),
            _ => false,
        }
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Subject line used when the packet is posted.
    #[must_use]
    pub fn subject(&self) -> String {
        let summary = self.message.lines().next().unwrap_or("").trim();
        format!("{PACKET_MARKER} {} | {summary}", self.repo_name)
    }

    /// Decodes every file entry back to its original bytes.
    pub fn decode_files(&self) -> std::result::Result<BTreeMap<String, Vec<u8>>, DecodeError> {
        self.files
            .iter()
            .map(|(path, blob)| Ok((normalize_relative_path(path)?, decode_blob(blob)?)))
            .collect()
    }

    /// Checks the version, the type tag and every file path.
    pub fn validate(&self) -> std::result::Result<(), DecodeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedVersion(self.schema_version.clone()));
        }
        if self.kind != PACKET_KIND {
            return Err(DecodeError::UnsupportedKind(self.kind.clone()));
        }
        for path in self.files.keys() {
            normalize_relative_path(path)?;
        }
        Ok(())
    }

    /// Writes the packet's files beneath `dir`, returning how many were written.
    pub fn restore_to(&self, dir: &Path) -> Result<usize> {
        let files = self.decode_files()?;
        for (rel, bytes) in &files {
            let target = dir.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;
        }
        Ok(files.len())
    }
}

/// Packages the directory at `root` as a commit named after the directory.
pub fn pack(root: &Path, message: &str) -> Result<Packet> {
    pack_with(&DirectorySource::new(root), &default_repo_name(root), None, message)
}

/// The base name of `root` once resolved, so `.` names the current directory.
#[must_use]
pub fn default_repo_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "repo".to_string())
}

/// Packages any file source into a signed-by-digest commit packet.
pub fn pack_with(
    source: &dyn FileSource,
    repo_name: &str,
    author: Option<&str>,
    message: &str,
) -> Result<Packet> {
    let mut files = BTreeMap::new();
    for (path, bytes) in source.files()? {
        files.insert(path, encode_blob(&bytes)?);
    }

    let mut packet = Packet {
        schema_version: SCHEMA_VERSION.to_string(),
        kind: PACKET_KIND.to_string(),
        repo_name: repo_name.to_string(),
        author: author.map(str::to_string),
        message: message.to_string(),
        created_at: format_timestamp(&Utc::now()),
        files,
        integrity_digest: None,
    };
    packet.integrity_digest = Some(packet.compute_digest()?);

    tracing::debug!(
        "Packed {} file(s) for {} ({})",
        packet.files.len(),
        packet.repo_name,
        packet.integrity_digest.as_deref().unwrap_or_default()
    );

    Ok(packet)
}

/// Recovers a packet from text that may wrap it in headers or quoting.
///
/// Every `{` is tried as the start of the outermost object, left to right; the
/// first one that deserializes as a packet wins. Non-packet text yields a
/// typed error instead of a panic.
pub fn unpack(text: &str) -> std::result::Result<Packet, DecodeError> {
    let mut first_error = None;

    for (start, _) in text.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        let value = match stream.next() {
            Some(Ok(value @ serde_json::Value::Object(_))) => value,
            _ => continue,
        };

        match serde_json::from_value::<Packet>(value) {
            Ok(packet) => return validate(packet),
            Err(e) => {
                first_error.get_or_insert_with(|| DecodeError::Malformed(e.to_string()));
            }
        }
    }

    Err(first_error.unwrap_or(DecodeError::NoJsonObject))
}

fn validate(packet: Packet) -> std::result::Result<Packet, DecodeError> {
    packet.validate()?;
    Ok(packet)
}

/// Formats a timestamp the way packets and the index store them.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an originator timestamp into the index's fixed UTC form.
///
/// Accepts RFC 3339 with any offset, and offset-less ISO-8601 (read as UTC).
#[must_use]
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(format_timestamp(&dt.with_timezone(&Utc)));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| format_timestamp(&naive.and_utc()))
}
