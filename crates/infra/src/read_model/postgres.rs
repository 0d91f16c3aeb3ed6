//! Postgres-backed user view store.
//!
//! The store trait is synchronous, so every call bridges onto the tokio
//! runtime captured at construction. Callers may be plain worker threads or
//! tasks on a multi-threaded runtime; `block_in_place` covers the latter.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::error;

use postview_core::{Store, UserId};

use super::user_view::{UserViewRow, UserViewStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_view (
    user_id           BIGINT PRIMARY KEY,
    name              TEXT NOT NULL,
    email             TEXT NOT NULL,
    department        TEXT NOT NULL DEFAULT '',
    status            TEXT NOT NULL DEFAULT '',
    created_at        TIMESTAMPTZ NOT NULL,
    updated_at        TIMESTAMPTZ NOT NULL,
    version           BIGINT NOT NULL,
    last_processed_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS user_view_department_idx ON user_view (department);
CREATE INDEX IF NOT EXISTS user_view_status_idx ON user_view (status);
CREATE TABLE IF NOT EXISTS user_view_tombstone (
    user_id    BIGINT PRIMARY KEY,
    version    BIGINT NOT NULL,
    deleted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

const COLUMNS: &str =
    "user_id, name, email, department, status, created_at, updated_at, version, last_processed_at";

pub struct PostgresUserViewStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresUserViewStore {
    /// Must be called from within a tokio runtime.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            handle: Handle::current(),
        }
    }

    /// Create the `user_view` and `user_view_tombstone` tables if missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.handle.block_on(fut))
    }

    fn fetch_where(&self, clause: &str, arg: &str, op: &'static str) -> Vec<UserViewRow> {
        let sql = format!("SELECT {COLUMNS} FROM user_view WHERE {clause} ORDER BY user_id");
        let result = self.block_on(sqlx::query(&sql).bind(arg).fetch_all(&self.pool));
        match result {
            Ok(rows) => rows.iter().filter_map(decode_row).collect(),
            Err(e) => {
                error!(operation = op, error = %e, "user view query failed");
                Vec::new()
            }
        }
    }
}

fn decode_row(row: &PgRow) -> Option<UserViewRow> {
    let decoded = (|| -> Result<UserViewRow, sqlx::Error> {
        Ok(UserViewRow {
            user_id: UserId::new(row.try_get::<i64, _>("user_id")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            department: row.try_get("department")?,
            status: row.try_get("status")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            version: u64::try_from(row.try_get::<i64, _>("version")?)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            last_processed_at: row.try_get::<DateTime<Utc>, _>("last_processed_at")?,
        })
    })();

    match decoded {
        Ok(view) => Some(view),
        Err(e) => {
            error!(error = %e, "failed to decode user_view row");
            None
        }
    }
}

impl Store<UserId, UserViewRow> for PostgresUserViewStore {
    fn get(&self, key: &UserId) -> Option<UserViewRow> {
        let sql = format!("SELECT {COLUMNS} FROM user_view WHERE user_id = $1");
        let result = self.block_on(
            sqlx::query(&sql)
                .bind(key.get())
                .fetch_optional(&self.pool),
        );
        match result {
            Ok(row) => row.as_ref().and_then(decode_row),
            Err(e) => {
                error!(user_id = %key, error = %e, "user view lookup failed");
                None
            }
        }
    }

    fn upsert(&self, key: UserId, value: UserViewRow) {
        let Ok(version) = i64::try_from(value.version) else {
            error!(user_id = %key, version = value.version, "user view version out of range; row not written");
            return;
        };
        let result = self.block_on(
            sqlx::query(
                r#"
                INSERT INTO user_view (
                    user_id, name, email, department, status,
                    created_at, updated_at, version, last_processed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (user_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    email = EXCLUDED.email,
                    department = EXCLUDED.department,
                    status = EXCLUDED.status,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    version = EXCLUDED.version,
                    last_processed_at = EXCLUDED.last_processed_at
                "#,
            )
            .bind(key.get())
            .bind(&value.name)
            .bind(&value.email)
            .bind(&value.department)
            .bind(&value.status)
            .bind(value.created_at)
            .bind(value.updated_at)
            .bind(version)
            .bind(value.last_processed_at)
            .execute(&self.pool),
        );
        if let Err(e) = result {
            error!(user_id = %key, error = %e, "user view upsert failed");
        }
    }

    fn remove(&self, key: &UserId) -> Option<UserViewRow> {
        let sql = format!("DELETE FROM user_view WHERE user_id = $1 RETURNING {COLUMNS}");
        let result = self.block_on(
            sqlx::query(&sql)
                .bind(key.get())
                .fetch_optional(&self.pool),
        );
        match result {
            Ok(row) => row.as_ref().and_then(decode_row),
            Err(e) => {
                error!(user_id = %key, error = %e, "user view delete failed");
                None
            }
        }
    }

    fn list(&self) -> Vec<UserViewRow> {
        let sql = format!("SELECT {COLUMNS} FROM user_view ORDER BY user_id");
        match self.block_on(sqlx::query(&sql).fetch_all(&self.pool)) {
            Ok(rows) => rows.iter().filter_map(decode_row).collect(),
            Err(e) => {
                error!(error = %e, "user view list failed");
                Vec::new()
            }
        }
    }

    // The projector is the single writer per key, so read-modify-write is safe here.
    fn modify(&self, key: &UserId, f: &mut dyn FnMut(&mut UserViewRow)) -> Option<UserViewRow> {
        let mut row = self.get(key)?;
        f(&mut row);
        self.upsert(*key, row.clone());
        Some(row)
    }
}

impl UserViewStore for PostgresUserViewStore {
    fn tombstone(&self, user_id: UserId) -> Option<u64> {
        let result = self.block_on(
            sqlx::query("SELECT version FROM user_view_tombstone WHERE user_id = $1")
                .bind(user_id.get())
                .fetch_optional(&self.pool),
        );
        match result {
            Ok(row) => row
                .and_then(|r| r.try_get::<i64, _>("version").ok())
                .and_then(|v| u64::try_from(v).ok()),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "tombstone lookup failed");
                None
            }
        }
    }

    fn record_tombstone(&self, user_id: UserId, version: u64) {
        let Ok(version) = i64::try_from(version) else {
            error!(user_id = %user_id, version, "tombstone version out of range; not recorded");
            return;
        };
        let result = self.block_on(
            sqlx::query(
                r#"
                INSERT INTO user_view_tombstone (user_id, version, deleted_at)
                VALUES ($1, $2, now())
                ON CONFLICT (user_id) DO UPDATE SET
                    version = GREATEST(user_view_tombstone.version, EXCLUDED.version),
                    deleted_at = EXCLUDED.deleted_at
                "#,
            )
            .bind(user_id.get())
            .bind(version)
            .execute(&self.pool),
        );
        if let Err(e) = result {
            error!(user_id = %user_id, error = %e, "tombstone write failed");
        }
    }

    fn clear_tombstone(&self, user_id: UserId) {
        let result = self.block_on(
            sqlx::query("DELETE FROM user_view_tombstone WHERE user_id = $1")
                .bind(user_id.get())
                .execute(&self.pool),
        );
        if let Err(e) = result {
            error!(user_id = %user_id, error = %e, "tombstone delete failed");
        }
    }

    fn find_by_department(&self, department: &str) -> Vec<UserViewRow> {
        self.fetch_where("department = $1", department, "find_by_department")
    }

    fn find_by_status(&self, status: &str) -> Vec<UserViewRow> {
        self.fetch_where("status = $1", status, "find_by_status")
    }

    fn find_by_name_containing(&self, fragment: &str) -> Vec<UserViewRow> {
        self.fetch_where("strpos(name, $1) > 0", fragment, "find_by_name_containing")
    }
}
