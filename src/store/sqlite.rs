//! SQLite-backed TimeStore.
//!
//! One database file holds every time-bound record plus the progression
//! counters. Due queries are pure reads; mutations are single-row.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    ActivityThreshold, Choice, CommunitySettings, EngagementEvent, EngagementKind,
    EngagementOutcome, EntryRules, LevelReward, NewEngagement, NewPunishment, ProgressionRecord,
    Punishment, PunishmentKind, TimedGrant,
};
use crate::ids::{ChannelId, CommunityId, MemberId, MessageId, TagId};

/// SQLite-backed store.
///
/// Thread-safe via an internal `Mutex<Connection>`; every call holds the
/// lock for a single short statement group.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const GRANT_COLUMNS: &str = "id, community, member, tag, expires_at";
const PUNISHMENT_COLUMNS: &str =
    "id, community, member, issuer, kind, reason, tag, expires_at, active, created_at";
const ENGAGEMENT_COLUMNS: &str = "id, kind, community, channel, response_handle, prompt, \
     created_by, created_at, ends_at, is_active, outcome, choices, entry";

impl SqliteStore {
    /// Open (or create) the database file at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    // -----------------------------------------------------------------------
    // Community settings
    // -----------------------------------------------------------------------

    /// Settings for a community; an empty record when none were saved.
    pub fn settings(&self, community: CommunityId) -> Result<CommunitySettings, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT welcome_message, verification_tag, verification_channel, \
                 verification_message, mute_tag, level_up_template, level_up_channel \
                 FROM community_settings WHERE community = ?1",
                params![community.sql()],
                |row| {
                    Ok(CommunitySettings {
                        community,
                        welcome_message: row.get(0)?,
                        verification_tag: row.get::<_, Option<i64>>(1)?.map(TagId::from_sql),
                        verification_channel: row
                            .get::<_, Option<i64>>(2)?
                            .map(ChannelId::from_sql),
                        verification_message: row
                            .get::<_, Option<i64>>(3)?
                            .map(MessageId::from_sql),
                        mute_tag: row.get::<_, Option<i64>>(4)?.map(TagId::from_sql),
                        level_up_template: row.get(5)?,
                        level_up_channel: row.get::<_, Option<i64>>(6)?.map(ChannelId::from_sql),
                    })
                },
            )
            .optional()?;
        Ok(found.unwrap_or_else(|| CommunitySettings::empty(community)))
    }

    /// Insert or replace the full settings row.
    pub fn save_settings(&self, settings: &CommunitySettings) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO community_settings \
             (community, welcome_message, verification_tag, verification_channel, \
              verification_message, mute_tag, level_up_template, level_up_channel) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(community) DO UPDATE SET \
              welcome_message = excluded.welcome_message, \
              verification_tag = excluded.verification_tag, \
              verification_channel = excluded.verification_channel, \
              verification_message = excluded.verification_message, \
              mute_tag = excluded.mute_tag, \
              level_up_template = excluded.level_up_template, \
              level_up_channel = excluded.level_up_channel",
            params![
                settings.community.sql(),
                settings.welcome_message,
                settings.verification_tag.map(TagId::sql),
                settings.verification_channel.map(ChannelId::sql),
                settings.verification_message.map(MessageId::sql),
                settings.mute_tag.map(TagId::sql),
                settings.level_up_template,
                settings.level_up_channel.map(ChannelId::sql),
            ],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Timed grants
    // -----------------------------------------------------------------------

    /// Record a timed grant. A second outstanding grant for the same
    /// (community, member, tag) is rejected with [`StoreError::Conflict`].
    pub fn insert_grant(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
        expires_at: i64,
    ) -> Result<TimedGrant, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO timed_grants (community, member, tag, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![community.sql(), member.sql(), tag.sql(), expires_at],
        )
        .map_err(|e| conflict_or(e, "an outstanding grant already exists for this member and tag"))?;
        Ok(TimedGrant {
            id: conn.last_insert_rowid(),
            community,
            member,
            tag,
            expires_at,
        })
    }

    /// The outstanding grant for (community, member, tag), if any.
    pub fn outstanding_grant(
        &self,
        community: CommunityId,
        member: MemberId,
        tag: TagId,
    ) -> Result<Option<TimedGrant>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM timed_grants WHERE community = ?1 AND member = ?2 AND tag = ?3"
        );
        Ok(conn
            .query_row(&sql, params![community.sql(), member.sql(), tag.sql()], row_to_grant)
            .optional()?)
    }

    /// Fetch one grant by id.
    pub fn grant(&self, id: i64) -> Result<Option<TimedGrant>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {GRANT_COLUMNS} FROM timed_grants WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_grant).optional()?)
    }

    /// All grants whose deadline is at or before `now`.
    pub fn due_grants(&self, now: i64) -> Result<Vec<TimedGrant>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM timed_grants WHERE expires_at <= ?1 ORDER BY expires_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![now], row_to_grant)?;
        collect_rows(rows)
    }

    /// Delete a grant. Returns `false` when it was already gone.
    pub fn delete_grant(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM timed_grants WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // -----------------------------------------------------------------------
    // Punishments
    // -----------------------------------------------------------------------

    /// Record a punishment. Kick and warn are stored inactive; a second
    /// active mute/ban for the same member is a [`StoreError::Conflict`].
    pub fn insert_punishment(&self, new: &NewPunishment) -> Result<Punishment, StoreError> {
        let active = !new.kind.is_instantaneous();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO punishments \
             (community, member, issuer, kind, reason, tag, expires_at, active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.community.sql(),
                new.member.sql(),
                new.issuer.sql(),
                new.kind.as_str(),
                new.reason,
                new.tag.map(TagId::sql),
                new.expires_at,
                active,
                new.created_at,
            ],
        )
        .map_err(|e| conflict_or(e, &format!("member already has an active {}", new.kind)))?;
        Ok(Punishment {
            id: conn.last_insert_rowid(),
            community: new.community,
            member: new.member,
            issuer: new.issuer,
            kind: new.kind,
            reason: new.reason.clone(),
            tag: new.tag,
            expires_at: new.expires_at,
            active,
            created_at: new.created_at,
        })
    }

    /// Fetch one punishment by id.
    pub fn punishment(&self, id: i64) -> Result<Option<Punishment>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PUNISHMENT_COLUMNS} FROM punishments WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_punishment).optional()?)
    }

    /// Active punishments whose deadline is at or before `now`.
    pub fn due_active_punishments(&self, now: i64) -> Result<Vec<Punishment>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM punishments \
             WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1 \
             ORDER BY expires_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![now], row_to_punishment)?;
        collect_rows(rows)
    }

    /// Mark a punishment inactive. Returns `false` if it was not active.
    pub fn deactivate_punishment(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE punishments SET active = 0 WHERE id = ?1 AND active = 1",
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Punishment history for a member, newest first, optionally by kind.
    pub fn punishments_for(
        &self,
        community: CommunityId,
        member: MemberId,
        kind: Option<PunishmentKind>,
    ) -> Result<Vec<Punishment>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PUNISHMENT_COLUMNS} FROM punishments \
             WHERE community = ?1 AND member = ?2 AND (?3 IS NULL OR kind = ?3) \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![community.sql(), member.sql(), kind.map(PunishmentKind::as_str)],
            row_to_punishment,
        )?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Engagements
    // -----------------------------------------------------------------------

    /// Record a new active engagement. A second active engagement on the
    /// same response message is a [`StoreError::Conflict`].
    pub fn insert_engagement(&self, new: &NewEngagement) -> Result<EngagementEvent, StoreError> {
        let choices = encode_json(&new.choices)?;
        let entry = encode_json(&new.entry)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO engagements \
             (kind, community, channel, response_handle, prompt, created_by, created_at, \
              ends_at, is_active, outcome, choices, entry) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, NULL, ?9, ?10)",
            params![
                new.kind.as_str(),
                new.community.sql(),
                new.channel.sql(),
                new.response_handle.sql(),
                new.prompt,
                new.created_by.sql(),
                new.created_at,
                new.ends_at,
                choices,
                entry,
            ],
        )
        .map_err(|e| conflict_or(e, "an active engagement already uses this message"))?;
        Ok(EngagementEvent {
            id: conn.last_insert_rowid(),
            kind: new.kind,
            community: new.community,
            channel: new.channel,
            response_handle: new.response_handle,
            prompt: new.prompt.clone(),
            created_by: new.created_by,
            created_at: new.created_at,
            ends_at: new.ends_at,
            is_active: true,
            outcome: None,
            choices: new.choices.clone(),
            entry: new.entry.clone(),
        })
    }

    /// Fetch one engagement by id.
    pub fn engagement(&self, id: i64) -> Result<Option<EngagementEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {ENGAGEMENT_COLUMNS} FROM engagements WHERE id = ?1");
        let raw = conn.query_row(&sql, params![id], row_to_raw_engagement).optional()?;
        raw.map(RawEngagement::decode).transpose()
    }

    /// Active engagements whose deadline is at or before `now`.
    pub fn due_engagements(&self, now: i64) -> Result<Vec<EngagementEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ENGAGEMENT_COLUMNS} FROM engagements \
             WHERE is_active = 1 AND ends_at IS NOT NULL AND ends_at <= ?1 \
             ORDER BY ends_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![now], row_to_raw_engagement)?;
        let raws = collect_rows(rows)?;
        let mut events = Vec::with_capacity(raws.len());
        for raw in raws {
            let id = raw.id;
            match raw.decode() {
                Ok(event) => events.push(event),
                // One malformed row must not hide the others from the sweep.
                Err(e) => tracing::warn!(engagement_id = id, "skipping malformed engagement: {e}"),
            }
        }
        Ok(events)
    }

    /// Persist the outcome and flip `is_active` to false.
    ///
    /// Compare-and-set on `is_active`: returns `false` if the engagement was
    /// already closed, so the outcome is written at most once.
    pub fn close_engagement(
        &self,
        id: i64,
        outcome: &EngagementOutcome,
    ) -> Result<bool, StoreError> {
        let json = encode_json(outcome)?;
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE engagements SET is_active = 0, outcome = ?1 WHERE id = ?2 AND is_active = 1",
            params![json, id],
        )?;
        Ok(rows > 0)
    }

    /// Replace the outcome of a closed engagement (rerolls).
    pub fn replace_outcome(&self, id: i64, outcome: &EngagementOutcome) -> Result<(), StoreError> {
        let json = encode_json(outcome)?;
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE engagements SET outcome = ?1 WHERE id = ?2 AND is_active = 0",
            params![json, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("closed engagement {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Progression
    // -----------------------------------------------------------------------

    /// Counters for a member; zeros when the member never posted.
    pub fn progression(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<ProgressionRecord, StoreError> {
        let conn = self.lock()?;
        read_progression(&conn, community, member)
    }

    /// Increment the message counter and return the new count.
    pub fn increment_message_count(
        &self,
        community: CommunityId,
        member: MemberId,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO progression (community, member, message_count) VALUES (?1, ?2, 1) \
             ON CONFLICT(community, member) DO UPDATE SET message_count = message_count + 1",
            params![community.sql(), member.sql()],
        )?;
        Ok(read_progression(&conn, community, member)?.message_count)
    }

    /// Add `amount` xp and return the new total.
    pub fn add_xp(
        &self,
        community: CommunityId,
        member: MemberId,
        amount: u64,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO progression (community, member, xp) VALUES (?1, ?2, ?3) \
             ON CONFLICT(community, member) DO UPDATE SET xp = xp + excluded.xp",
            params![community.sql(), member.sql(), u64_to_sql(amount)],
        )?;
        Ok(read_progression(&conn, community, member)?.xp)
    }

    /// Raise the stored level to `level`. Never lowers it; returns `true`
    /// only when the stored level actually advanced.
    pub fn advance_level(
        &self,
        community: CommunityId,
        member: MemberId,
        level: u32,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE progression SET level = ?3 WHERE community = ?1 AND member = ?2 AND level < ?3",
            params![community.sql(), member.sql(), level],
        )?;
        Ok(rows > 0)
    }

    // -----------------------------------------------------------------------
    // Activity ladder
    // -----------------------------------------------------------------------

    /// Add a ladder rung. Duplicated tag or count yields a descriptive conflict.
    pub fn insert_threshold(
        &self,
        community: CommunityId,
        tag: TagId,
        required_count: u64,
    ) -> Result<ActivityThreshold, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO activity_thresholds (community, tag, required_count) VALUES (?1, ?2, ?3)",
            params![community.sql(), tag.sql(), u64_to_sql(required_count)],
        );
        match inserted {
            Ok(_) => Ok(ActivityThreshold {
                community,
                tag,
                required_count,
            }),
            Err(e) if is_constraint_violation(&e) => {
                let tag_taken: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM activity_thresholds WHERE community = ?1 AND tag = ?2)",
                    params![community.sql(), tag.sql()],
                    |row| row.get(0),
                )?;
                if tag_taken {
                    Err(StoreError::Conflict(format!(
                        "tag {tag} is already on the activity ladder"
                    )))
                } else {
                    Err(StoreError::Conflict(format!(
                        "threshold {required_count} is already assigned to another tag"
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the rung for `tag`. Returns whether a row was removed.
    pub fn remove_threshold(&self, community: CommunityId, tag: TagId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM activity_thresholds WHERE community = ?1 AND tag = ?2",
            params![community.sql(), tag.sql()],
        )?;
        Ok(rows > 0)
    }

    /// The ladder, ascending by required count.
    pub fn thresholds(&self, community: CommunityId) -> Result<Vec<ActivityThreshold>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT tag, required_count FROM activity_thresholds \
             WHERE community = ?1 ORDER BY required_count ASC",
        )?;
        let rows = stmt.query_map(params![community.sql()], |row| {
            Ok(ActivityThreshold {
                community,
                tag: TagId::from_sql(row.get(0)?),
                required_count: u64_from_sql(row.get(1)?),
            })
        })?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Level rewards
    // -----------------------------------------------------------------------

    /// Insert or replace the reward for a level.
    pub fn upsert_level_reward(&self, reward: &LevelReward) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO level_rewards (community, level, tag, message) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(community, level) DO UPDATE SET tag = excluded.tag, message = excluded.message",
            params![
                reward.community.sql(),
                reward.level,
                reward.tag.map(TagId::sql),
                reward.message,
            ],
        )?;
        Ok(())
    }

    /// Remove the reward for a level. Returns whether a row was removed.
    pub fn remove_level_reward(&self, community: CommunityId, level: u32) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM level_rewards WHERE community = ?1 AND level = ?2",
            params![community.sql(), level],
        )?;
        Ok(rows > 0)
    }

    /// Rewards with `after < level <= up_to`, ascending.
    pub fn level_rewards_between(
        &self,
        community: CommunityId,
        after: u32,
        up_to: u32,
    ) -> Result<Vec<LevelReward>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT level, tag, message FROM level_rewards \
             WHERE community = ?1 AND level > ?2 AND level <= ?3 ORDER BY level ASC",
        )?;
        let rows = stmt.query_map(params![community.sql(), after, up_to], |row| {
            Ok(LevelReward {
                community,
                level: row.get(0)?,
                tag: row.get::<_, Option<i64>>(1)?.map(TagId::from_sql),
                message: row.get(2)?,
            })
        })?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Acquire the connection mutex.
    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the SQLite store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn conflict_or(err: rusqlite::Error, message: &str) -> StoreError {
    if is_constraint_violation(&err) {
        StoreError::Conflict(message.to_owned())
    } else {
        StoreError::Sqlite(err)
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn u64_to_sql(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn u64_from_sql(v: i64) -> u64 {
    u64::try_from(v).unwrap_or_default()
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn read_progression(
    conn: &Connection,
    community: CommunityId,
    member: MemberId,
) -> Result<ProgressionRecord, StoreError> {
    let found = conn
        .query_row(
            "SELECT message_count, xp, level FROM progression WHERE community = ?1 AND member = ?2",
            params![community.sql(), member.sql()],
            |row| {
                Ok(ProgressionRecord {
                    community,
                    member,
                    message_count: u64_from_sql(row.get(0)?),
                    xp: u64_from_sql(row.get(1)?),
                    level: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_else(|| ProgressionRecord::empty(community, member)))
}

fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimedGrant> {
    Ok(TimedGrant {
        id: row.get(0)?,
        community: CommunityId::from_sql(row.get(1)?),
        member: MemberId::from_sql(row.get(2)?),
        tag: TagId::from_sql(row.get(3)?),
        expires_at: row.get(4)?,
    })
}

fn row_to_punishment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Punishment> {
    let kind_str: String = row.get(4)?;
    let kind = PunishmentKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown punishment kind {kind_str}").into(),
        )
    })?;
    Ok(Punishment {
        id: row.get(0)?,
        community: CommunityId::from_sql(row.get(1)?),
        member: MemberId::from_sql(row.get(2)?),
        issuer: MemberId::from_sql(row.get(3)?),
        kind,
        reason: row.get(5)?,
        tag: row.get::<_, Option<i64>>(6)?.map(TagId::from_sql),
        expires_at: row.get(7)?,
        active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Engagement row before its JSON columns are decoded.
struct RawEngagement {
    id: i64,
    kind: String,
    community: i64,
    channel: i64,
    response_handle: i64,
    prompt: String,
    created_by: i64,
    created_at: i64,
    ends_at: Option<i64>,
    is_active: bool,
    outcome: Option<String>,
    choices: String,
    entry: String,
}

impl RawEngagement {
    fn decode(self) -> Result<EngagementEvent, StoreError> {
        let kind = EngagementKind::parse(&self.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("engagement {}: unknown kind {}", self.id, self.kind))
        })?;
        let outcome = match self.outcome {
            Some(json) => Some(
                serde_json::from_str::<EngagementOutcome>(&json)
                    .map_err(|e| StoreError::Corrupt(format!("engagement {}: {e}", self.id)))?,
            ),
            None => None,
        };
        let choices: Vec<Choice> = serde_json::from_str(&self.choices)
            .map_err(|e| StoreError::Corrupt(format!("engagement {}: {e}", self.id)))?;
        let entry: EntryRules = serde_json::from_str(&self.entry)
            .map_err(|e| StoreError::Corrupt(format!("engagement {}: {e}", self.id)))?;
        Ok(EngagementEvent {
            id: self.id,
            kind,
            community: CommunityId::from_sql(self.community),
            channel: ChannelId::from_sql(self.channel),
            response_handle: MessageId::from_sql(self.response_handle),
            prompt: self.prompt,
            created_by: MemberId::from_sql(self.created_by),
            created_at: self.created_at,
            ends_at: self.ends_at,
            is_active: self.is_active,
            outcome,
            choices,
            entry,
        })
    }
}

fn row_to_raw_engagement(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEngagement> {
    Ok(RawEngagement {
        id: row.get(0)?,
        kind: row.get(1)?,
        community: row.get(2)?,
        channel: row.get(3)?,
        response_handle: row.get(4)?,
        prompt: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        ends_at: row.get(8)?,
        is_active: row.get(9)?,
        outcome: row.get(10)?,
        choices: row.get(11)?,
        entry: row.get(12)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
