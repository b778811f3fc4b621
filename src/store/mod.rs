//! Persistence for users, bearer sessions, backup codes and QR approval sessions.
//!
//! Handlers only talk to the [`Store`] trait. Two backends exist:
//! - [`PgStore`]: Postgres via `sqlx`, used whenever a DSN is configured.
//! - [`MemoryStore`]: process-local maps, used for development and tests.
//!
//! Raw bearer tokens never reach the store; callers pass SHA-256 hashes.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::{
    AccountStatus, QrLoginSession, QrSessionStatus, Role, SessionKind, SessionRecord, User,
    UserProfile,
};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    Duplicate,
    #[error("record not found")]
    NotFound,
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counts returned by [`Store::purge_expired`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PurgeReport {
    pub sessions: u64,
    pub qr_sessions: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness check used by `/health`.
    async fn ping(&self) -> StoreResult<()>;

    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Persist the mutable second-factor and account fields of `user`.
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn backup_code_hashes(&self, user_id: Uuid) -> StoreResult<Vec<String>>;
    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> StoreResult<()>;
    /// Remove one stored hash. Returns `false` when another request already consumed it.
    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> StoreResult<bool>;

    async fn insert_session(&self, session: &SessionRecord) -> StoreResult<()>;
    /// Look up an unexpired session of the given kind.
    async fn find_session(
        &self,
        token_hash: &[u8],
        kind: SessionKind,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SessionRecord>>;
    async fn delete_session(&self, token_hash: &[u8]) -> StoreResult<()>;
    /// Unexpired full sessions of one user, newest first.
    async fn list_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>>;
    /// Revoke one session by its public id. Returns `false` if the user owns no such session.
    async fn delete_user_session(&self, user_id: Uuid, session_id: Uuid) -> StoreResult<bool>;
    /// Revoke every session of the user except `keep_hash`. Returns how many were removed.
    async fn delete_sessions_except(&self, user_id: Uuid, keep_hash: &[u8]) -> StoreResult<u64>;

    async fn insert_qr_session(&self, session: &QrLoginSession) -> StoreResult<()>;
    async fn find_qr_session(&self, session_token: &str) -> StoreResult<Option<QrLoginSession>>;
    /// Move an open session to `approved`/`rejected`. Returns `false` if it was
    /// no longer pending or had expired.
    async fn resolve_qr_session(
        &self,
        session_token: &str,
        status: QrSessionStatus,
        device_id: Option<&str>,
        device_info: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Mark an approved session as exchanged for a login token and delete the
    /// pending session that opened it. Only the first caller gets `true`.
    async fn claim_qr_session(&self, session_token: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport>;
}
