use chrono::NaiveDateTime;
use regsync_core::{format_timestamp, ChatId, RecordError, ReviewStatus, StateValue, UserRecord};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use thiserror::Error;

pub const REGISTRY_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Why a single snapshot entry could not be applied. The transaction for that
/// entry has been rolled back; other entries are unaffected.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub chat_id: ChatId,
    pub state: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub expertise: Option<String>,
    pub email: Option<String>,
    pub motivation: Option<String>,
    pub verification_type: Option<String>,
    pub verification_value: Option<String>,
    pub verification_ref_name: Option<String>,
    pub status: Option<String>,
    pub rejection_reason: Option<String>,
    pub reviewed_by_user_id: Option<String>,
    pub reviewed_by_username: Option<String>,
    pub review_decision: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl StoredUser {
    /// `None` when the column is empty or holds a value the bot never writes.
    pub fn review_status(&self) -> Option<ReviewStatus> {
        self.status.as_deref()?.parse().ok()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: ChatId(row.get(0)?),
            state: row.get(1)?,
            name: row.get(2)?,
            company: row.get(3)?,
            expertise: row.get(4)?,
            email: row.get(5)?,
            motivation: row.get(6)?,
            verification_type: row.get(7)?,
            verification_value: row.get(8)?,
            verification_ref_name: row.get(9)?,
            status: row.get(10)?,
            rejection_reason: row.get(11)?,
            reviewed_by_user_id: row.get(12)?,
            reviewed_by_username: row.get(13)?,
            review_decision: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

const SELECT_USER_COLUMNS: &str = "
    SELECT chat_id, state, name, company, expertise, email, motivation,
           verification_type, verification_value, verification_ref_name,
           status, rejection_reason, reviewed_by_user_id, reviewed_by_username,
           review_decision, created_at, updated_at
    FROM users
";

/// The relational side of the registry: one `users` row per chat.
pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Creates the `users` table if needed. Safe to call on every run, including
    /// against a table an older deployment created without a version stamp.
    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > REGISTRY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: REGISTRY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_users.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Inserts or fully overwrites a user's profile.
    ///
    /// On update every profile and review column takes the record's value, so
    /// fields missing from the record become NULL. `state` and `created_at` are
    /// never touched by an update.
    pub fn merge_user(
        &mut self,
        chat_id: ChatId,
        record: &UserRecord,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome, MergeError> {
        let now = format_timestamp(now);
        let updated_at = record.updated_at.as_deref().unwrap_or(&now);

        self.in_transaction(|tx| {
            if user_exists(tx, chat_id)? {
                tx.execute(
                    "
                    UPDATE users SET
                        name = ?1,
                        company = ?2,
                        expertise = ?3,
                        email = ?4,
                        motivation = ?5,
                        verification_type = ?6,
                        verification_value = ?7,
                        verification_ref_name = ?8,
                        status = ?9,
                        rejection_reason = ?10,
                        reviewed_by_user_id = ?11,
                        reviewed_by_username = ?12,
                        review_decision = ?13,
                        updated_at = ?14
                    WHERE chat_id = ?15
                    ",
                    params![
                        record.name,
                        record.company,
                        record.expertise,
                        record.email,
                        record.motivation,
                        record.verification_type,
                        record.verification_value,
                        record.verification_ref_name,
                        record.status_or_pending(),
                        record.rejection_reason,
                        record.reviewed_by_user_id,
                        record.reviewed_by_username,
                        record.review_decision,
                        updated_at,
                        chat_id.0,
                    ],
                )?;
                Ok(MergeOutcome::Updated)
            } else {
                tx.execute(
                    "
                    INSERT INTO users (
                        chat_id,
                        name,
                        company,
                        expertise,
                        email,
                        motivation,
                        verification_type,
                        verification_value,
                        verification_ref_name,
                        status,
                        rejection_reason,
                        reviewed_by_user_id,
                        reviewed_by_username,
                        review_decision,
                        created_at,
                        updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                    ",
                    params![
                        chat_id.0,
                        record.name,
                        record.company,
                        record.expertise,
                        record.email,
                        record.motivation,
                        record.verification_type,
                        record.verification_value,
                        record.verification_ref_name,
                        record.status_or_pending(),
                        record.rejection_reason,
                        record.reviewed_by_user_id,
                        record.reviewed_by_username,
                        record.review_decision,
                        record.created_at.as_deref().unwrap_or(&now),
                        updated_at,
                    ],
                )?;
                Ok(MergeOutcome::Inserted)
            }
        })
    }

    /// Records the latest conversation stage. An unknown chat gets a bare row
    /// holding only the state and timestamps; a known chat keeps its profile.
    pub fn merge_state(
        &mut self,
        chat_id: ChatId,
        state: &StateValue,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome, MergeError> {
        let now = format_timestamp(now);

        self.in_transaction(|tx| {
            if user_exists(tx, chat_id)? {
                tx.execute(
                    "UPDATE users SET state = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![state.as_deref(), now, chat_id.0],
                )?;
                Ok(MergeOutcome::Updated)
            } else {
                // status is written explicitly so the column default does not apply
                tx.execute(
                    "
                    INSERT INTO users (chat_id, state, status, created_at, updated_at)
                    VALUES (?1, ?2, NULL, ?3, ?3)
                    ",
                    params![chat_id.0, state.as_deref(), now],
                )?;
                Ok(MergeOutcome::Inserted)
            }
        })
    }

    pub fn user(&self, chat_id: ChatId) -> Result<Option<StoredUser>, StorageError> {
        let sql = format!("{SELECT_USER_COLUMNS} WHERE chat_id = ?1");
        let user = self
            .conn
            .query_row(&sql, [chat_id.0], StoredUser::from_row)
            .optional()?;
        Ok(user)
    }

    pub fn users(&self) -> Result<Vec<StoredUser>, StorageError> {
        let sql = format!("{SELECT_USER_COLUMNS} ORDER BY chat_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], StoredUser::from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn user_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_conn, err)| err.into())
    }

    fn in_transaction<T>(
        &mut self,
        apply: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, MergeError> {
        let tx = self.conn.transaction()?;
        match apply(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                // the apply error is the one worth reporting
                let _ = tx.rollback();
                Err(err.into())
            }
        }
    }
}

fn user_exists(conn: &Connection, chat_id: ChatId) -> rusqlite::Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM users WHERE chat_id = ?1",
            [chat_id.0],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}
