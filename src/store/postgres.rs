use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Connection, PgPool, Row,
};
use std::time::Duration;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    AccountStatus, PurgeReport, QrLoginSession, QrSessionStatus, Role, SessionKind,
    SessionRecord, Store, StoreError, StoreResult, User,
};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str = "id, email, full_name, password_hash, role, status, is_active, \
     two_factor_enabled, two_factor_secret, qr_auth_enabled, qr_auth_device_id, \
     qr_auth_device_info, qr_auth_device_registered_at, created_at";

const SESSION_COLUMNS: &str =
    "id, token_hash, user_id, kind, ip_address, user_agent, created_at, expires_at";

const QR_COLUMNS: &str = "session_token, user_id, status, approved_by_device_id, \
     approved_by_device_info, login_ip, login_user_agent, pending_token_hash, created_at, \
     expires_at, resolved_at, consumed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the same pool policy the server uses.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply `sql/schema.sql`; every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        for statement in split_sql_statements(SCHEMA_SQL) {
            sqlx::query(&statement).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::parse(&role).ok_or_else(|| StoreError::Corrupt(format!("role {role}")))?,
        status: AccountStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("status {status}")))?,
        is_active: row.try_get("is_active")?,
        two_factor_enabled: row.try_get("two_factor_enabled")?,
        two_factor_secret: row.try_get("two_factor_secret")?,
        qr_auth_enabled: row.try_get("qr_auth_enabled")?,
        qr_auth_device_id: row.try_get("qr_auth_device_id")?,
        qr_auth_device_info: row.try_get("qr_auth_device_info")?,
        qr_auth_device_registered_at: row.try_get("qr_auth_device_registered_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<SessionRecord> {
    let kind: String = row.try_get("kind")?;
    Ok(SessionRecord {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        user_id: row.try_get("user_id")?,
        kind: SessionKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("session kind {kind}")))?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn qr_session_from_row(row: &PgRow) -> StoreResult<QrLoginSession> {
    let status: String = row.try_get("status")?;
    Ok(QrLoginSession {
        session_token: row.try_get("session_token")?,
        user_id: row.try_get("user_id")?,
        status: QrSessionStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("qr status {status}")))?,
        approved_by_device_id: row.try_get("approved_by_device_id")?,
        approved_by_device_info: row.try_get("approved_by_device_info")?,
        login_ip: row.try_get("login_ip")?,
        login_user_agent: row.try_get("login_user_agent")?,
        pending_token_hash: row.try_get("pending_token_hash")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        resolved_at: row.try_get("resolved_at")?,
        consumed_at: row.try_get("consumed_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self.pool.acquire().await?;
        conn.ping().instrument(span).await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let query = r"
            INSERT INTO users
                (id, email, full_name, password_hash, role, status, is_active,
                 two_factor_enabled, two_factor_secret, qr_auth_enabled, qr_auth_device_id,
                 qr_auth_device_info, qr_auth_device_registered_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.status.as_str())
            .bind(user.is_active)
            .bind(user.two_factor_enabled)
            .bind(user.two_factor_secret.as_deref())
            .bind(user.qr_auth_enabled)
            .bind(user.qr_auth_device_id.as_deref())
            .bind(user.qr_auth_device_info.as_deref())
            .bind(user.qr_auth_device_registered_at)
            .bind(user.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let query = r"
            UPDATE users SET
                full_name = $2,
                role = $3,
                status = $4,
                is_active = $5,
                two_factor_enabled = $6,
                two_factor_secret = $7,
                qr_auth_enabled = $8,
                qr_auth_device_id = $9,
                qr_auth_device_info = $10,
                qr_auth_device_registered_at = $11
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.full_name)
            .bind(user.role.as_str())
            .bind(user.status.as_str())
            .bind(user.is_active)
            .bind(user.two_factor_enabled)
            .bind(user.two_factor_secret.as_deref())
            .bind(user.qr_auth_enabled)
            .bind(user.qr_auth_device_id.as_deref())
            .bind(user.qr_auth_device_info.as_deref())
            .bind(user.qr_auth_device_registered_at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn backup_code_hashes(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let query = "SELECT code_hash FROM backup_codes WHERE user_id = $1";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;
        rows.iter()
            .map(|row| row.try_get("code_hash").map_err(StoreError::from))
            .collect()
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for hash in hashes {
            sqlx::query("INSERT INTO backup_codes (user_id, code_hash) VALUES ($1, $2)")
                .bind(user_id)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> StoreResult<bool> {
        let query = "DELETE FROM backup_codes WHERE user_id = $1 AND code_hash = $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let query = r"
            INSERT INTO sessions
                (token_hash, id, user_id, kind, ip_address, user_agent, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(&session.token_hash)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.kind.as_str())
            .bind(session.ip_address.as_deref())
            .bind(session.user_agent.as_deref())
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn find_session(
        &self,
        token_hash: &[u8],
        kind: SessionKind,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SessionRecord>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE token_hash = $1 AND kind = $2 AND expires_at > $3"
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .bind(kind.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, token_hash: &[u8]) -> StoreResult<()> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND kind = 'full' AND expires_at > $2 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn delete_user_session(&self, user_id: Uuid, session_id: Uuid) -> StoreResult<bool> {
        let query = "DELETE FROM sessions WHERE user_id = $1 AND id = $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(session_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_sessions_except(&self, user_id: Uuid, keep_hash: &[u8]) -> StoreResult<u64> {
        let query = "DELETE FROM sessions WHERE user_id = $1 AND token_hash <> $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(keep_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_qr_session(&self, session: &QrLoginSession) -> StoreResult<()> {
        let query = r"
            INSERT INTO qr_login_sessions
                (session_token, user_id, status, login_ip, login_user_agent, pending_token_hash,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(&session.session_token)
            .bind(session.user_id)
            .bind(session.status.as_str())
            .bind(session.login_ip.as_deref())
            .bind(session.login_user_agent.as_deref())
            .bind(session.pending_token_hash.as_deref())
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn find_qr_session(&self, session_token: &str) -> StoreResult<Option<QrLoginSession>> {
        let query = format!("SELECT {QR_COLUMNS} FROM qr_login_sessions WHERE session_token = $1");
        let row = sqlx::query(&query)
            .bind(session_token)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        row.as_ref().map(qr_session_from_row).transpose()
    }

    async fn resolve_qr_session(
        &self,
        session_token: &str,
        status: QrSessionStatus,
        device_id: Option<&str>,
        device_info: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // The status guard makes concurrent approve/reject calls race safely.
        let query = r"
            UPDATE qr_login_sessions SET
                status = $2,
                approved_by_device_id = $3,
                approved_by_device_info = $4,
                resolved_at = $5
            WHERE session_token = $1 AND status = 'pending' AND expires_at > $5
        ";
        let result = sqlx::query(query)
            .bind(session_token)
            .bind(status.as_str())
            .bind(device_id)
            .bind(device_info)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_qr_session(&self, session_token: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let query = r"
            UPDATE qr_login_sessions SET consumed_at = $2
            WHERE session_token = $1
              AND status = 'approved'
              AND consumed_at IS NULL
              AND expires_at > $2
            RETURNING pending_token_hash
        ";
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(query)
            .bind(session_token)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let pending: Option<Vec<u8>> = row.try_get("pending_token_hash")?;
        if let Some(pending) = pending {
            sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
                .bind(pending)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let qr_sessions = sqlx::query("DELETE FROM qr_login_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(PurgeReport {
            sessions,
            qr_sessions,
        })
    }
}
