//! SQLite DDL for the warden store.
//!
//! Natural-key invariants live here as UNIQUE constraints and partial
//! unique indexes so duplicate intent is rejected by the store itself.

use rusqlite::Connection;

/// Complete DDL. Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS community_settings (
    community            INTEGER PRIMARY KEY,
    welcome_message      TEXT,
    verification_tag     INTEGER,
    verification_channel INTEGER,
    verification_message INTEGER,
    mute_tag             INTEGER,
    level_up_template    TEXT,
    level_up_channel     INTEGER
);

-- Rows are deleted once reconciled, so the plain UNIQUE covers "while outstanding".
CREATE TABLE IF NOT EXISTS timed_grants (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    community  INTEGER NOT NULL,
    member     INTEGER NOT NULL,
    tag        INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    UNIQUE (community, member, tag)
);

CREATE INDEX IF NOT EXISTS idx_grants_expires_at ON timed_grants(expires_at);

CREATE TABLE IF NOT EXISTS punishments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    community  INTEGER NOT NULL,
    member     INTEGER NOT NULL,
    issuer     INTEGER NOT NULL,
    kind       TEXT NOT NULL,        -- mute | ban | kick | warn
    reason     TEXT NOT NULL DEFAULT '',
    tag        INTEGER,              -- mute tag applied at issue time
    expires_at INTEGER,
    active     INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_punishments_active
    ON punishments(community, member, kind)
    WHERE active = 1 AND kind IN ('mute', 'ban');
CREATE INDEX IF NOT EXISTS idx_punishments_due ON punishments(active, expires_at);
CREATE INDEX IF NOT EXISTS idx_punishments_member ON punishments(community, member);

CREATE TABLE IF NOT EXISTS engagements (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    kind            TEXT NOT NULL,     -- poll | giveaway
    community       INTEGER NOT NULL,
    channel         INTEGER NOT NULL,
    response_handle INTEGER NOT NULL,
    prompt          TEXT NOT NULL,
    created_by      INTEGER NOT NULL,
    created_at      INTEGER NOT NULL,
    ends_at         INTEGER,
    is_active       INTEGER NOT NULL DEFAULT 1,
    outcome         TEXT,              -- JSON EngagementOutcome
    choices         TEXT NOT NULL DEFAULT '[]',
    entry           TEXT NOT NULL DEFAULT '{}'
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_engagements_active_handle
    ON engagements(response_handle)
    WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_engagements_due ON engagements(is_active, ends_at);

CREATE TABLE IF NOT EXISTS progression (
    community     INTEGER NOT NULL,
    member        INTEGER NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    xp            INTEGER NOT NULL DEFAULT 0,
    level         INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (community, member)
);

CREATE TABLE IF NOT EXISTS activity_thresholds (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    community      INTEGER NOT NULL,
    tag            INTEGER NOT NULL,
    required_count INTEGER NOT NULL,
    UNIQUE (community, tag),
    UNIQUE (community, required_count)
);

CREATE TABLE IF NOT EXISTS level_rewards (
    community INTEGER NOT NULL,
    level     INTEGER NOT NULL,
    tag       INTEGER,
    message   TEXT,
    PRIMARY KEY (community, level)
);
"#;

/// Apply the full schema to an open connection and seed the version stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the schema version, `None` when the stamp is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
