use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::{COMMIT_SCHEMA, GATEWAY_SCHEMA};
use super::{CommitStore, GatewayStore};
use crate::error::{Error, Result};
use crate::types::*;

fn open<P: AsRef<Path>>(db_path: P) -> Result<Mutex<Connection>> {
    let conn = Connection::open(db_path)?;

    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    Ok(Mutex::new(conn))
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|e| e.into_inner())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// SQLite-backed commit mirror used by the indexer.
pub struct SqliteCommitStore {
    conn: Mutex<Connection>,
}

impl SqliteCommitStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Ok(Self {
            conn: open(db_path)?,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }
}

const COMMIT_COLUMNS: &str =
    "message_id, repo_name, author, created_at, message, integrity_digest, raw_packet, ingested_at";

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<CommitRecord> {
    Ok(CommitRecord {
        message_id: row.get(0)?,
        repo_name: row.get(1)?,
        author: row.get(2)?,
        created_at: row.get(3)?,
        message: row.get(4)?,
        integrity_digest: row.get(5)?,
        raw_packet: row.get(6)?,
        ingested_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

impl CommitStore for SqliteCommitStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(COMMIT_SCHEMA)?;
        Ok(())
    }

    fn insert_commit(&self, record: &CommitRecord) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO commits
             (message_id, repo_name, author, created_at, message, integrity_digest, raw_packet, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.message_id,
                record.repo_name,
                record.author,
                record.created_at,
                record.message,
                record.integrity_digest,
                record.raw_packet,
                format_datetime(&record.ingested_at),
            ],
        )?;
        Ok(rows > 0)
    }

    fn get_commit(&self, message_id: &str) -> Result<Option<CommitRecord>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE message_id = ?1"),
            params![message_id],
            commit_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_commits(&self, repo_name: Option<&str>) -> Result<Vec<CommitRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMMIT_COLUMNS} FROM commits
             WHERE ?1 IS NULL OR repo_name = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;

        let rows = stmt.query_map(params![repo_name], commit_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn count_commits(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// SQLite-backed key, usage and ownership ledger used by the gateway.
pub struct SqliteGatewayStore {
    conn: Mutex<Connection>,
}

impl SqliteGatewayStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Ok(Self {
            conn: open(db_path)?,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<ApiCredential> {
    Ok(ApiCredential {
        key_id: row.get(0)?,
        secret: row.get(1)?,
        owner: row.get(2)?,
        quota_bytes: row.get(3)?,
        used_bytes: row.get(4)?,
        status: KeyStatus::parse(&row.get::<_, String>(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn ownership_from_row(row: &Row<'_>) -> rusqlite::Result<RepoOwnership> {
    Ok(RepoOwnership {
        key_id: row.get(0)?,
        repo_name: row.get(1)?,
        claimed_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

impl GatewayStore for SqliteGatewayStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(GATEWAY_SCHEMA)?;
        Ok(())
    }

    // Credential operations

    fn create_credential(&self, credential: &ApiCredential) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO api_keys (key_id, secret, owner, quota_bytes, used_bytes, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                credential.key_id,
                credential.secret,
                credential.owner,
                credential.quota_bytes,
                credential.used_bytes,
                credential.status.as_str(),
                format_datetime(&credential.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::KeyIdCollision)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_credential(&self, key_id: &str) -> Result<Option<ApiCredential>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT key_id, secret, owner, quota_bytes, used_bytes, status, created_at
             FROM api_keys WHERE key_id = ?1",
            params![key_id],
            credential_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_credentials(&self) -> Result<Vec<ApiCredential>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key_id, secret, owner, quota_bytes, used_bytes, status, created_at
             FROM api_keys ORDER BY created_at, key_id",
        )?;

        let rows = stmt.query_map([], credential_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn set_credential_status(&self, key_id: &str, status: KeyStatus) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE api_keys SET status = ?1 WHERE key_id = ?2",
            params![status.as_str(), key_id],
        )?;
        Ok(rows > 0)
    }

    fn record_publish(
        &self,
        key_id: &str,
        bytes: i64,
        repo_name: &str,
        action: &str,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // The check and the increment are one statement, so two publishes
        // cannot both pass on the same remaining quota.
        let reserved = tx.execute(
            "UPDATE api_keys SET used_bytes = used_bytes + ?1
             WHERE key_id = ?2 AND status = 'active' AND used_bytes < quota_bytes",
            params![bytes, key_id],
        )?;
        if reserved == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO usage_logs (key_id, timestamp, action, bytes_transferred)
             VALUES (?1, ?2, ?3, ?4)",
            params![key_id, format_datetime(&Utc::now()), action, bytes],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO repo_ownership (key_id, repo_name, claimed_at)
             VALUES (?1, ?2, ?3)",
            params![key_id, repo_name, format_datetime(&Utc::now())],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn list_usage(&self, key_id: &str) -> Result<Vec<UsageLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, key_id, timestamp, action, bytes_transferred
             FROM usage_logs WHERE key_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![key_id], |row| {
            Ok(UsageLogEntry {
                id: row.get(0)?,
                key_id: row.get(1)?,
                timestamp: parse_datetime(&row.get::<_, String>(2)?),
                action: row.get(3)?,
                bytes_transferred: row.get(4)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Ownership operations

    fn list_owned_repos(&self, key_id: &str) -> Result<Vec<RepoOwnership>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key_id, repo_name, claimed_at
             FROM repo_ownership WHERE key_id = ?1 ORDER BY repo_name",
        )?;

        let rows = stmt.query_map(params![key_id], ownership_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn release_repo(&self, key_id: &str, repo_name: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM repo_ownership WHERE key_id = ?1 AND repo_name = ?2",
            params![key_id, repo_name],
        )?;
        Ok(rows > 0)
    }

    fn rename_repo(&self, key_id: &str, old_name: &str, new_name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM repo_ownership WHERE key_id = ?1 AND repo_name = ?2)",
            params![key_id, new_name],
            |row| row.get(0),
        )?;
        if taken {
            return Err(Error::OwnershipConflict(new_name.to_string()));
        }

        let rows = tx.execute(
            "UPDATE repo_ownership SET repo_name = ?1 WHERE key_id = ?2 AND repo_name = ?3",
            params![new_name, key_id, old_name],
        )?;

        tx.commit()?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_store(temp: &TempDir) -> SqliteCommitStore {
        let store = SqliteCommitStore::new(temp.path().join("commits.db")).unwrap();
        store.initialize().unwrap();
        store
    }

    fn gateway_store(temp: &TempDir) -> SqliteGatewayStore {
        let store = SqliteGatewayStore::new(temp.path().join("gateway.db")).unwrap();
        store.initialize().unwrap();
        store
    }

    fn record(message_id: &str, repo: &str, created_at: &str) -> CommitRecord {
        CommitRecord {
            message_id: message_id.to_string(),
            repo_name: repo.to_string(),
            author: "Unknown".to_string(),
            created_at: created_at.to_string(),
            message: "msg".to_string(),
            integrity_digest: "00".repeat(32),
            raw_packet: vec![1, 2, 3],
            ingested_at: Utc::now(),
        }
    }

    fn credential(key_id: &str, quota_bytes: i64) -> ApiCredential {
        ApiCredential {
            key_id: key_id.to_string(),
            secret: "secret".to_string(),
            owner: "alice".to_string(),
            quota_bytes,
            used_bytes: 0,
            status: KeyStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let commits = commit_store(&temp);
        let gateway = gateway_store(&temp);

        let tables = |conn: &Connection| -> Vec<String> {
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap()
        };

        assert!(tables(&*commits.conn()).contains(&"commits".to_string()));
        let gateway_tables = tables(&*gateway.conn());
        assert!(gateway_tables.contains(&"api_keys".to_string()));
        assert!(gateway_tables.contains(&"usage_logs".to_string()));
        assert!(gateway_tables.contains(&"repo_ownership".to_string()));
    }

    #[test]
    fn test_insert_commit_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = commit_store(&temp);

        let rec = record("alt.test:42", "demo", "2024-01-01T00:00:00.000000Z");
        assert!(store.insert_commit(&rec).unwrap());

        let mut again = rec.clone();
        again.message = "different".to_string();
        assert!(!store.insert_commit(&again).unwrap());

        assert_eq!(store.count_commits().unwrap(), 1);
        let fetched = store.get_commit("alt.test:42").unwrap().unwrap();
        assert_eq!(fetched.message, "msg");
        assert_eq!(fetched.raw_packet, vec![1, 2, 3]);
    }

    #[test]
    fn test_commits_are_append_only() {
        let temp = TempDir::new().unwrap();
        let store = commit_store(&temp);
        store
            .insert_commit(&record("alt.test:1", "demo", "2024-01-01T00:00:00.000000Z"))
            .unwrap();

        let conn = store.conn();
        assert!(conn.execute("UPDATE commits SET message = 'x'", []).is_err());
        assert!(conn.execute("DELETE FROM commits", []).is_err());
    }

    #[test]
    fn test_list_commits_newest_first_and_filtered() {
        let temp = TempDir::new().unwrap();
        let store = commit_store(&temp);

        store
            .insert_commit(&record("alt.test:1", "a", "2024-01-01T00:00:00.000000Z"))
            .unwrap();
        store
            .insert_commit(&record("alt.test:2", "b", "2024-03-01T00:00:00.000000Z"))
            .unwrap();
        store
            .insert_commit(&record("alt.test:3", "a", "2024-02-01T00:00:00.000000Z"))
            .unwrap();

        let all: Vec<_> = store
            .list_commits(None)
            .unwrap()
            .into_iter()
            .map(|c| c.message_id)
            .collect();
        assert_eq!(
            all,
            vec!["alt.test:2", "alt.test:3", "alt.test:1"]
        );

        let only_a = store.list_commits(Some("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|c| c.repo_name == "a"));
        assert!(store.list_commits(Some("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_key_id_collision() {
        let temp = TempDir::new().unwrap();
        let store = gateway_store(&temp);

        store.create_credential(&credential("ds_key_1", 100)).unwrap();
        let result = store.create_credential(&credential("ds_key_1", 100));
        assert!(matches!(result, Err(Error::KeyIdCollision)));
    }

    #[test]
    fn test_record_publish_reserves_and_claims() {
        let temp = TempDir::new().unwrap();
        let store = gateway_store(&temp);
        store.create_credential(&credential("ds_key_1", 100)).unwrap();

        assert!(store.record_publish("ds_key_1", 60, "demo", "publish").unwrap());
        // Over quota afterwards, but the reservation that crossed the line stands.
        assert!(store.record_publish("ds_key_1", 60, "demo", "publish").unwrap());
        assert!(!store.record_publish("ds_key_1", 1, "demo", "publish").unwrap());

        let cred = store.get_credential("ds_key_1").unwrap().unwrap();
        assert_eq!(cred.used_bytes, 120);
        assert!(cred.quota_exhausted());

        let usage = store.list_usage("ds_key_1").unwrap();
        assert_eq!(usage.len(), 2);
        assert!(usage.iter().all(|u| u.bytes_transferred == 60));

        let owned = store.list_owned_repos("ds_key_1").unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].repo_name, "demo");
    }

    #[test]
    fn test_record_publish_refused_for_revoked_key() {
        let temp = TempDir::new().unwrap();
        let store = gateway_store(&temp);
        store.create_credential(&credential("ds_key_1", 100)).unwrap();
        assert!(store
            .set_credential_status("ds_key_1", KeyStatus::Revoked)
            .unwrap());

        assert!(!store.record_publish("ds_key_1", 1, "demo", "publish").unwrap());
        assert!(store.list_usage("ds_key_1").unwrap().is_empty());
        assert!(store.list_owned_repos("ds_key_1").unwrap().is_empty());
        assert!(!store.record_publish("ds_key_missing", 1, "demo", "publish").unwrap());
    }

    #[test]
    fn test_used_bytes_cannot_decrease() {
        let temp = TempDir::new().unwrap();
        let store = gateway_store(&temp);
        store.create_credential(&credential("ds_key_1", 100)).unwrap();
        store.record_publish("ds_key_1", 10, "demo", "publish").unwrap();

        let conn = store.conn();
        assert!(conn
            .execute("UPDATE api_keys SET used_bytes = 0 WHERE key_id = 'ds_key_1'", [])
            .is_err());
    }

    #[test]
    fn test_rename_and_release() {
        let temp = TempDir::new().unwrap();
        let store = gateway_store(&temp);
        store.create_credential(&credential("ds_key_1", 1000)).unwrap();
        store.record_publish("ds_key_1", 1, "old", "publish").unwrap();
        store.record_publish("ds_key_1", 1, "taken", "publish").unwrap();

        let conflict = store.rename_repo("ds_key_1", "old", "taken");
        assert!(matches!(conflict, Err(Error::OwnershipConflict(name)) if name == "taken"));

        assert!(store.rename_repo("ds_key_1", "old", "new").unwrap());
        assert!(!store.rename_repo("ds_key_1", "old", "newer").unwrap());

        let names: Vec<_> = store
            .list_owned_repos("ds_key_1")
            .unwrap()
            .into_iter()
            .map(|o| o.repo_name)
            .collect();
        assert_eq!(names, vec!["new", "taken"]);

        assert!(store.release_repo("ds_key_1", "new").unwrap());
        assert!(!store.release_repo("ds_key_1", "new").unwrap());
    }
}
