//! The local commit index: a mirror of every packet seen on the network.
//!
//! Articles are identified by `<channel>:<article>`, which is the only
//! deduplication key. Re-scanning a channel is always safe.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::{IndexConfig, NetworkConfig};
use crate::error::Result;
use crate::nntp::Session;
use crate::packet::{PACKET_MARKER, compress, normalize_timestamp, unpack};
use crate::store::CommitStore;
use crate::types::CommitRecord;

/// Author recorded for packets that do not name one.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[must_use]
pub fn message_id(channel: &str, article: u64) -> String {
    format!("{channel}:{article}")
}

/// Why an article was not admitted to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Decode(String),
    MissingField(&'static str),
    InvalidTimestamp(String),
    DigestMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{e}"),
            Self::MissingField(field) => write!(f, "missing field: {field}"),
            Self::InvalidTimestamp(ts) => write!(f, "invalid timestamp: {ts}"),
            Self::DigestMismatch => write!(f, "integrity digest mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Stored,
    AlreadyPresent,
    Rejected(RejectReason),
}

/// Outcome of one scan. `error` is set when the scan stopped early; whatever
/// was stored before that point stays stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub channel: String,
    pub scanned: usize,
    pub matched: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Articles that decoded but could not be written to the store.
    pub failed: usize,
    pub error: Option<String>,
}

impl ScanReport {
    fn record(&mut self, outcome: &Ingested) {
        match outcome {
            Ingested::Stored => self.stored += 1,
            Ingested::AlreadyPresent => self.duplicates += 1,
            Ingested::Rejected(_) => self.rejected += 1,
        }
    }
}

pub struct CommitIndex {
    store: Arc<dyn CommitStore>,
    config: IndexConfig,
}

impl CommitIndex {
    pub fn new(store: Arc<dyn CommitStore>, config: IndexConfig) -> Self {
        Self { store, config }
    }

    /// Decodes `raw_text` and stores it under `message_id` unless that id is
    /// already present.
    pub fn ingest(&self, message_id: &str, raw_text: &str) -> Result<Ingested> {
        let packet = match unpack(raw_text) {
            Ok(packet) => packet,
            Err(e) => return Ok(self.reject(message_id, RejectReason::Decode(e.to_string()))),
        };

        if packet.repo_name.trim().is_empty() {
            return Ok(self.reject(message_id, RejectReason::MissingField("repo")));
        }
        let Some(digest) = packet.integrity_digest.clone() else {
            return Ok(self.reject(message_id, RejectReason::MissingField("sig")));
        };
        let Some(created_at) = normalize_timestamp(&packet.created_at) else {
            return Ok(self.reject(
                message_id,
                RejectReason::InvalidTimestamp(packet.created_at.clone()),
            ));
        };
        if self.config.verify_digest && !packet.digest_matches() {
            return Ok(self.reject(message_id, RejectReason::DigestMismatch));
        }

        let record = CommitRecord {
            message_id: message_id.to_string(),
            repo_name: packet.repo_name.clone(),
            author: packet
                .author
                .clone()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            created_at,
            message: packet.message.clone(),
            integrity_digest: digest,
            raw_packet: compress(raw_text.as_bytes())?,
            ingested_at: Utc::now(),
        };

        if self.store.insert_commit(&record)? {
            tracing::info!("Indexed {} ({})", record.message_id, record.repo_name);
            Ok(Ingested::Stored)
        } else {
            tracing::debug!("Already indexed {message_id}");
            Ok(Ingested::AlreadyPresent)
        }
    }

    fn reject(&self, message_id: &str, reason: RejectReason) -> Ingested {
        tracing::warn!("Rejected {message_id}: {reason}");
        Ingested::Rejected(reason)
    }

    /// Newest first, optionally for one repo name.
    pub fn list_commits(&self, repo_name: Option<&str>) -> Result<Vec<CommitRecord>> {
        self.store.list_commits(repo_name)
    }

    pub fn get_commit(&self, message_id: &str) -> Result<Option<CommitRecord>> {
        self.store.get_commit(message_id)
    }

    /// Walks the newest `limit` articles of `channel` and ingests every one
    /// that carries the packet marker.
    ///
    /// An error selecting the channel is returned as-is. Once articles are
    /// flowing, a network error ends the scan and is reported in
    /// [`ScanReport::error`] alongside the progress made. A store error on
    /// one article is counted in [`ScanReport::failed`] and the scan goes on.
    pub fn scan_and_ingest<S: Read + Write>(
        &self,
        session: &mut Session<S>,
        channel: &str,
        limit: u64,
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            channel: channel.to_string(),
            ..ScanReport::default()
        };

        let Some(info) = session.select_channel(channel)? else {
            tracing::warn!("Could not read watermarks for {channel}, nothing scanned");
            return Ok(report);
        };
        tracing::debug!(
            "{}: ~{} articles, {}..={}",
            info.name,
            info.estimated_count,
            info.low,
            info.high
        );

        for article in session.fetch_range(info.low, info.high, limit) {
            let article = match article {
                Ok(article) => article,
                Err(e) => {
                    tracing::warn!("Scan of {channel} stopped early: {e}");
                    report.error = Some(e.to_string());
                    break;
                }
            };
            report.scanned += 1;

            if !article.text.contains(PACKET_MARKER) {
                continue;
            }
            report.matched += 1;

            let id = message_id(channel, article.number);
            match self.ingest(&id, &article.text) {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    tracing::error!("Failed to index {id}: {e}");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Scanned {} article(s) in {}: {} new, {} known, {} rejected, {} failed",
            report.scanned,
            channel,
            report.stored,
            report.duplicates,
            report.rejected,
            report.failed
        );
        Ok(report)
    }

    /// Opens a session with `config`, scans its channel and says goodbye.
    pub fn scan_network(&self, config: &NetworkConfig) -> Result<ScanReport> {
        let mut session = Session::open(config)?;
        let report = self.scan_and_ingest(&mut session, &config.channel, config.scan_limit)?;
        if let Err(e) = session.quit() {
            tracing::debug!("QUIT failed: {e}");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, pack_with};
    use crate::store::SqliteCommitStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn index(temp: &TempDir, verify_digest: bool) -> CommitIndex {
        let store = SqliteCommitStore::new(temp.path().join("commits.db")).unwrap();
        store.initialize().unwrap();
        CommitIndex::new(Arc::new(store), IndexConfig { verify_digest })
    }

    fn packet(repo: &str, message: &str) -> Packet {
        let mut files = BTreeMap::new();
        files.insert("README".to_string(), b"hello".to_vec());
        pack_with(&files, repo, None, message).unwrap()
    }

    fn article(packet: &Packet) -> String {
        format!(
            "Subject: {}\nNewsgroups: alt.test\n\n{}",
            packet.subject(),
            packet.to_wire().unwrap()
        )
    }

    #[test]
    fn test_message_id_is_channel_and_article() {
        assert_eq!(message_id("alt.test", 42), "alt.test:42");
    }

    #[test]
    fn test_ingest_then_reingest() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);
        let text = article(&packet("demo", "first"));

        assert_eq!(index.ingest("alt.test:42", &text).unwrap(), Ingested::Stored);
        assert_eq!(
            index.ingest("alt.test:42", &text).unwrap(),
            Ingested::AlreadyPresent
        );

        let commits = index.list_commits(None).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author, UNKNOWN_AUTHOR);
        assert_eq!(commits[0].repo_name, "demo");
    }

    #[test]
    fn test_stored_packet_decodes_back() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);
        let original = packet("demo", "first");
        index.ingest("alt.test:1", &article(&original)).unwrap();

        let record = index.get_commit("alt.test:1").unwrap().unwrap();
        assert_eq!(record.packet().unwrap(), original);
    }

    #[test]
    fn test_archive_keeps_the_article_as_received() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);
        let wire = packet("demo", "first").to_wire().unwrap();
        let extended = format!("{},\"x-client\":\"other\"}}", &wire[..wire.len() - 1]);
        let text = format!("Subject: [DEEPSEA] demo | first\n\n> quoted\n{extended}\n-- \nsig");

        index.ingest("alt.test:9", &text).unwrap();

        let record = index.get_commit("alt.test:9").unwrap().unwrap();
        assert_eq!(record.raw_text().unwrap(), text);
        assert_eq!(record.packet().unwrap().message, "first");
    }

    #[test]
    fn test_rejects_junk_and_foreign_versions() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);

        let outcome = index.ingest("alt.test:1", "just chatter").unwrap();
        assert!(matches!(outcome, Ingested::Rejected(RejectReason::Decode(_))));

        let mut old = packet("demo", "m");
        old.schema_version = "0.1.0".to_string();
        let outcome = index.ingest("alt.test:2", &article(&old)).unwrap();
        assert!(matches!(outcome, Ingested::Rejected(RejectReason::Decode(_))));

        assert!(index.list_commits(None).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_missing_digest_and_bad_timestamp() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);

        let mut unsigned = packet("demo", "m");
        unsigned.integrity_digest = None;
        assert_eq!(
            index.ingest("alt.test:1", &article(&unsigned)).unwrap(),
            Ingested::Rejected(RejectReason::MissingField("sig"))
        );

        let mut undated = packet("demo", "m");
        undated.created_at = "yesterday".to_string();
        assert_eq!(
            index.ingest("alt.test:2", &article(&undated)).unwrap(),
            Ingested::Rejected(RejectReason::InvalidTimestamp("yesterday".to_string()))
        );
    }

    #[test]
    fn test_digest_verification_is_opt_in() {
        let mut tampered = packet("demo", "m");
        tampered.message = "changed after signing".to_string();
        let text = article(&tampered);

        let temp = TempDir::new().unwrap();
        assert_eq!(
            index(&temp, false).ingest("alt.test:1", &text).unwrap(),
            Ingested::Stored
        );

        let temp = TempDir::new().unwrap();
        assert_eq!(
            index(&temp, true).ingest("alt.test:1", &text).unwrap(),
            Ingested::Rejected(RejectReason::DigestMismatch)
        );
    }

    #[test]
    fn test_timestamps_normalized_for_ordering() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp, false);

        let mut early = packet("demo", "early");
        early.created_at = "2024-05-01T12:00:00+02:00".to_string();
        let mut late = packet("demo", "late");
        late.created_at = "2024-05-01T11:00:00".to_string();

        index.ingest("alt.test:1", &article(&late)).unwrap();
        index.ingest("alt.test:2", &article(&early)).unwrap();

        let commits = index.list_commits(Some("demo")).unwrap();
        let messages: Vec<_> = commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["late", "early"]);
        assert_eq!(commits[1].created_at, "2024-05-01T10:00:00.000000Z");
    }
}
