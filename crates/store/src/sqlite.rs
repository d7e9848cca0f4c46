//! SQLite persistence for users, linked accounts, threads and checkpoints.
//!
//! Tables:
//! - `users`: identity and JSON preferences
//! - `provider_accounts`: one row per (user_id, provider), enforced by the key
//! - `conversation_threads`: one row per user; `thread_id` is unique
//! - `checkpoints`: agent state keyed by thread id

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::credential::{AccountStore, ProviderAccount, ProviderKind};
use concierge_core::error::StoreError;
use concierge_core::thread::{Checkpoint, Checkpointer, ThreadStore};
use concierge_core::user::{User, UserDirectory, UserPreferences};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    pool: SqlitePool,
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Map a driver error onto the domain taxonomy.
fn store_err(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {e}"))
        }
        other => StoreError::QueryFailed(format!("{context}: {other}")),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// An in-memory URL gets a single connection, since every sqlite
    /// `:memory:` connection is its own database.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        if !is_in_memory(url) {
            if let Some(parent) = options.get_filename().parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("Create {}: {e}", parent.display())))?;
            }
        }

        let max_connections = if is_in_memory(url) { 1 } else { max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(max_connections, "SQLite store initialized");
        Ok(store)
    }

    /// Ephemeral store for tests and one-off CLI runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new("sqlite::memory:", 1).await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 5] = [
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id             TEXT PRIMARY KEY,
                    name           TEXT,
                    email          TEXT,
                    phone_number   TEXT,
                    phone_verified INTEGER NOT NULL DEFAULT 0,
                    timezone       TEXT,
                    preferences    TEXT NOT NULL DEFAULT '{}',
                    updated_at     TEXT NOT NULL
                )
                "#,
            ),
            (
                "phone index",
                "CREATE INDEX IF NOT EXISTS idx_users_phone ON users(phone_number)",
            ),
            (
                "provider_accounts table",
                r#"
                CREATE TABLE IF NOT EXISTS provider_accounts (
                    user_id       TEXT NOT NULL,
                    provider      TEXT NOT NULL,
                    access_token  TEXT NOT NULL,
                    refresh_token TEXT,
                    expires_at    TEXT,
                    scopes        TEXT NOT NULL DEFAULT '[]',
                    updated_at    TEXT NOT NULL,
                    PRIMARY KEY (user_id, provider)
                )
                "#,
            ),
            (
                "conversation_threads table",
                r#"
                CREATE TABLE IF NOT EXISTS conversation_threads (
                    user_id    TEXT PRIMARY KEY,
                    thread_id  TEXT UNIQUE NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "checkpoints table",
                r#"
                CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id  TEXT PRIMARY KEY,
                    step       INTEGER NOT NULL DEFAULT 0,
                    messages   TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
        let get = store_err("users row");
        let preferences_json: String = row.try_get("preferences").map_err(&get)?;
        let preferences = serde_json::from_str::<serde_json::Value>(&preferences_json)
            .map(|v| UserPreferences::from_stored(&v))
            .unwrap_or_default();
        let phone_verified: i64 = row.try_get("phone_verified").map_err(&get)?;

        Ok(User {
            id: row.try_get("id").map_err(&get)?,
            name: row.try_get("name").map_err(&get)?,
            email: row.try_get("email").map_err(&get)?,
            phone_number: row.try_get("phone_number").map_err(&get)?,
            phone_verified: phone_verified != 0,
            timezone: row.try_get("timezone").map_err(&get)?,
            preferences,
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<ProviderAccount, StoreError> {
        let get = store_err("provider_accounts row");
        let provider: String = row.try_get("provider").map_err(&get)?;
        let provider = ProviderKind::from_str(&provider).map_err(StoreError::Corrupt)?;
        let expires_at: Option<String> = row.try_get("expires_at").map_err(&get)?;
        let scopes: String = row.try_get("scopes").map_err(&get)?;

        Ok(ProviderAccount {
            user_id: row.try_get("user_id").map_err(&get)?,
            provider,
            access_token: row.try_get("access_token").map_err(&get)?,
            refresh_token: row.try_get("refresh_token").map_err(&get)?,
            expires_at: expires_at.as_deref().map(parse_time).transpose()?,
            scopes: serde_json::from_str(&scopes).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("get_user"))?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_by_phone(&self, phone_number: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE phone_number = ? AND phone_verified = 1 LIMIT 1")
            .bind(phone_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("find_by_phone"))?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, phone_number, phone_verified, timezone, preferences, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone_number = excluded.phone_number,
                phone_verified = excluded.phone_verified,
                timezone = excluded.timezone,
                preferences = excluded.preferences,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(user.phone_verified as i64)
        .bind(&user.timezone)
        .bind(user.preferences.to_stored().to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err("upsert_user"))?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_account(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<ProviderAccount>, StoreError> {
        let row = sqlx::query("SELECT * FROM provider_accounts WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("get_account"))?;
        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn save_account(&self, account: &ProviderAccount) -> Result<(), StoreError> {
        let scopes = serde_json::to_string(&account.scopes).unwrap_or_else(|_| "[]".into());
        sqlx::query(
            r#"
            INSERT INTO provider_accounts
                (user_id, provider, access_token, refresh_token, expires_at, scopes, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, provider_accounts.refresh_token),
                expires_at = excluded.expires_at,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.user_id)
        .bind(account.provider.as_str())
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.expires_at.map(|t| t.to_rfc3339()))
        .bind(scopes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err("save_account"))?;
        Ok(())
    }

    async fn delete_account(&self, user_id: &str, provider: ProviderKind) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM provider_accounts WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_err("delete_account"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn get_or_create_thread_id(&self, user_id: &str) -> Result<String, StoreError> {
        // Insert-if-absent, then read back: concurrent first calls all see
        // the row that won the primary key.
        sqlx::query(
            "INSERT INTO conversation_threads (user_id, thread_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(format!("thread_{}", Uuid::new_v4().simple()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err("create thread"))?;

        let row = sqlx::query("SELECT thread_id FROM conversation_threads WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err("read thread"))?;
        row.try_get("thread_id").map_err(store_err("thread_id column"))
    }
}

#[async_trait]
impl Checkpointer for SqliteStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let Some(row) = sqlx::query("SELECT step, messages, updated_at FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("load checkpoint"))?
        else {
            return Ok(None);
        };

        let get = store_err("checkpoints row");
        let step: i64 = row.try_get("step").map_err(&get)?;
        let messages: String = row.try_get("messages").map_err(&get)?;
        let updated_at: String = row.try_get("updated_at").map_err(&get)?;

        Ok(Some(Checkpoint {
            thread_id: thread_id.to_string(),
            messages: serde_json::from_str(&messages)
                .map_err(|e| StoreError::Corrupt(format!("checkpoint {thread_id}: {e}")))?,
            step: step.max(0) as u64,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&checkpoint.messages)
            .map_err(|e| StoreError::Corrupt(format!("serialize checkpoint: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, step, messages, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET
                step = excluded.step,
                messages = excluded.messages,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.step as i64)
        .bind(messages)
        .bind(checkpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err("save checkpoint"))?;
        Ok(())
    }
}
