pub const COMMIT_SCHEMA: &str = r#"
-- Commits mirrored from the network, one row per article
CREATE TABLE IF NOT EXISTS commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,   -- <channel>:<article>
    repo_name TEXT NOT NULL,
    author TEXT NOT NULL,
    created_at TEXT NOT NULL,          -- normalized UTC RFC 3339, sorts lexically
    message TEXT NOT NULL,
    integrity_digest TEXT NOT NULL,
    raw_packet BLOB NOT NULL,          -- zlib-compressed article text
    ingested_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_commits_repo ON commits(repo_name);
CREATE INDEX IF NOT EXISTS idx_commits_created ON commits(created_at);

-- The network is append-only and so is the mirror
CREATE TRIGGER IF NOT EXISTS commits_no_update BEFORE UPDATE ON commits
BEGIN
    SELECT RAISE(ABORT, 'commits are append-only');
END;

CREATE TRIGGER IF NOT EXISTS commits_no_delete BEFORE DELETE ON commits
BEGIN
    SELECT RAISE(ABORT, 'commits are append-only');
END;
"#;

pub const GATEWAY_SCHEMA: &str = r#"
-- API keys; the secret is kept in the clear because it keys the HMAC
CREATE TABLE IF NOT EXISTS api_keys (
    key_id TEXT PRIMARY KEY,
    secret TEXT NOT NULL,
    owner TEXT NOT NULL,
    quota_bytes INTEGER NOT NULL,
    used_bytes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT DEFAULT (datetime('now'))
);

-- Audit trail, never read by authorization logic
CREATE TABLE IF NOT EXISTS usage_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id TEXT NOT NULL REFERENCES api_keys(key_id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    bytes_transferred INTEGER NOT NULL
);

-- Advisory, local-only claims on repo names
CREATE TABLE IF NOT EXISTS repo_ownership (
    key_id TEXT NOT NULL REFERENCES api_keys(key_id) ON DELETE CASCADE,
    repo_name TEXT NOT NULL,
    claimed_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (key_id, repo_name)
);

CREATE INDEX IF NOT EXISTS idx_usage_logs_key ON usage_logs(key_id);
CREATE INDEX IF NOT EXISTS idx_repo_ownership_name ON repo_ownership(repo_name);

CREATE TRIGGER IF NOT EXISTS api_keys_usage_monotone BEFORE UPDATE OF used_bytes ON api_keys
WHEN NEW.used_bytes < OLD.used_bytes
BEGIN
    SELECT RAISE(ABORT, 'used_bytes cannot decrease');
END;
"#;
