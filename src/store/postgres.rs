//! Postgres-backed credential store.
//!
//! Queries are plain runtime queries (no compile-time checking) and each runs
//! inside a `db.query` span. Schema lives in `sql/schema.sql`.

use super::{
    CredentialStore, LoginState, NewUser, PasswordDigest, StoreError, User, UserId, UserRecord,
};
use crate::auth::lockout::LockoutPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{info_span, Instrument, Span};

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
     is_active, email_verified, last_login_at, login_attempts, locked_until, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_user(
        &self,
        query: &str,
        bind: Bind<'_>,
    ) -> Result<Option<UserRecord>, StoreError> {
        let span = query_span("SELECT", query);
        let statement = sqlx::query(query);
        let statement = match bind {
            Bind::Id(id) => statement.bind(id.get()),
            Bind::Text(value) => statement.bind(value),
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(classify)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn execute_update(
        &self,
        query: &str,
        statement: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<bool, StoreError> {
        let span = query_span("UPDATE", query);
        let result = statement
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }
}

enum Bind<'a> {
    Id(UserId),
    Text(&'a str),
}

fn query_span(operation: &'static str, query: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = query
    )
}

/// Map driver errors onto the store taxonomy. Connectivity problems are
/// `Unavailable` so the circuit breaker can react to them.
fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
            let field = match db_err.constraint() {
                Some(name) if name.contains("username") => "username",
                _ => "email",
            };
            StoreError::Conflict { field }
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn record_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let decode = |err: sqlx::Error| StoreError::Backend(format!("failed to decode user row: {err}"));

    let attempts: i32 = row.try_get("login_attempts").map_err(decode)?;
    let user = User {
        id: UserId::new(row.try_get("id").map_err(decode)?),
        username: row.try_get("username").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        first_name: row.try_get("first_name").map_err(decode)?,
        last_name: row.try_get("last_name").map_err(decode)?,
        is_active: row.try_get("is_active").map_err(decode)?,
        email_verified: row.try_get("email_verified").map_err(decode)?,
        last_login_at: row.try_get("last_login_at").map_err(decode)?,
        login_attempts: u32::try_from(attempts).unwrap_or(0),
        locked_until: row.try_get("locked_until").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    };
    let hash: String = row.try_get("password_hash").map_err(decode)?;
    Ok(UserRecord::new(user, PasswordDigest::from_phc(hash)))
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        self.fetch_one_user(&query, Bind::Id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        );
        self.fetch_one_user(&query, Bind::Text(email)).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND deleted_at IS NULL");
        self.fetch_one_user(&query, Bind::Text(username)).await
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let query = format!(
            r"
            INSERT INTO users
                (username, email, password_hash, first_name, last_name)
            VALUES ($1, lower($2), $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "
        );
        let span = query_span("INSERT", &query);
        let row = sqlx::query(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.password_hash.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(classify)?;
        record_from_row(&row)
    }

    async fn update_login_state(&self, id: UserId, state: LoginState) -> Result<(), StoreError> {
        // last_login_at is only overwritten on success; updated_at is left alone.
        let query = r"
            UPDATE users
            SET login_attempts = $2,
                locked_until = $3,
                last_login_at = COALESCE($4, last_login_at)
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let attempts = i32::try_from(state.login_attempts).unwrap_or(i32::MAX);
        let statement = sqlx::query(query)
            .bind(id.get())
            .bind(attempts)
            .bind(state.locked_until)
            .bind(state.last_login_at);
        self.execute_update(query, statement).await.map(|_| ())
    }

    async fn record_failed_login(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginState>, StoreError> {
        // One statement, so the row lock serializes concurrent failures.
        // An expired lock restarts counting at 1; an active lock is kept as is.
        let query = r"
            UPDATE users
            SET login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                    ELSE login_attempts + 1
                END,
                locked_until = CASE
                    WHEN locked_until IS NOT NULL AND locked_until > $2 THEN locked_until
                    WHEN locked_until IS NOT NULL THEN
                        CASE WHEN 1 >= $3 THEN $4 ELSE NULL END
                    WHEN login_attempts + 1 >= $3 THEN $4
                    ELSE NULL
                END
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING login_attempts, locked_until
        ";
        let threshold = i32::try_from(policy.threshold()).unwrap_or(i32::MAX);
        let span = query_span("UPDATE", query);
        let row = sqlx::query(query)
            .bind(id.get())
            .bind(now)
            .bind(threshold)
            .bind(policy.lock_expiry(now))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(classify)?;

        row.map(|row| -> Result<LoginState, StoreError> {
            let decode =
                |err: sqlx::Error| StoreError::Backend(format!("failed to decode login state: {err}"));
            let attempts: i32 = row.try_get("login_attempts").map_err(decode)?;
            Ok(LoginState {
                login_attempts: u32::try_from(attempts).unwrap_or(0),
                locked_until: row.try_get("locked_until").map_err(decode)?,
                last_login_at: None,
            })
        })
        .transpose()
    }

    async fn set_active(&self, id: UserId, active: bool) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET is_active = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let statement = sqlx::query(query).bind(id.get()).bind(active);
        self.execute_update(query, statement).await
    }

    async fn set_password(&self, id: UserId, digest: PasswordDigest) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let statement = sqlx::query(query)
            .bind(id.get())
            .bind(digest.as_str().to_string());
        self.execute_update(query, statement).await
    }

    async fn soft_delete(&self, id: UserId) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET deleted_at = NOW(), is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
        ";
        let statement = sqlx::query(query).bind(id.get());
        self.execute_update(query, statement).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .map_err(classify)?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}
