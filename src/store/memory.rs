use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    PurgeReport, QrLoginSession, QrSessionStatus, SessionKind, SessionRecord, Store, StoreError,
    StoreResult, User,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    backup_codes: HashMap<Uuid, Vec<String>>,
    sessions: HashMap<Vec<u8>, SessionRecord>,
    qr_sessions: HashMap<String, QrLoginSession>,
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Duplicate);
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|user| user.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner.users.get_mut(&user.id) else {
            return Err(StoreError::NotFound);
        };
        *existing = user.clone();
        Ok(())
    }

    async fn backup_code_hashes(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.backup_codes.get(&user_id).cloned().unwrap_or_default())
    }

    async fn replace_backup_codes(&self, user_id: Uuid, hashes: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if hashes.is_empty() {
            inner.backup_codes.remove(&user_id);
        } else {
            inner.backup_codes.insert(user_id, hashes.to_vec());
        }
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: Uuid, hash: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(codes) = inner.backup_codes.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = codes.len();
        codes.retain(|stored| stored != hash);
        Ok(codes.len() < before)
    }

    async fn insert_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_session(
        &self,
        token_hash: &[u8],
        kind: SessionKind,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SessionRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .get(token_hash)
            .filter(|session| session.kind == kind && session.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, token_hash: &[u8]) -> StoreResult<()> {
        self.inner.lock().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SessionRecord>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|session| {
                session.user_id == user_id
                    && session.kind == SessionKind::Full
                    && session.expires_at > now
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_user_session(&self, user_id: Uuid, session_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|_, session| !(session.user_id == user_id && session.id == session_id));
        Ok(inner.sessions.len() < before)
    }

    async fn delete_sessions_except(&self, user_id: Uuid, keep_hash: &[u8]) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|hash, session| {
            session.user_id != user_id || hash.as_slice() == keep_hash
        });
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn insert_qr_session(&self, session: &QrLoginSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .qr_sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(())
    }

    async fn find_qr_session(&self, session_token: &str) -> StoreResult<Option<QrLoginSession>> {
        Ok(self.inner.lock().await.qr_sessions.get(session_token).cloned())
    }

    async fn resolve_qr_session(
        &self,
        session_token: &str,
        status: QrSessionStatus,
        device_id: Option<&str>,
        device_info: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.qr_sessions.get_mut(session_token) else {
            return Ok(false);
        };
        if !session.is_open_at(now) {
            return Ok(false);
        }
        session.status = status;
        session.approved_by_device_id = device_id.map(str::to_string);
        session.approved_by_device_info = device_info.map(str::to_string);
        session.resolved_at = Some(now);
        Ok(true)
    }

    async fn claim_qr_session(&self, session_token: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.qr_sessions.get_mut(session_token) else {
            return Ok(false);
        };
        if session.status != QrSessionStatus::Approved
            || session.consumed_at.is_some()
            || session.is_expired_at(now)
        {
            return Ok(false);
        }
        session.consumed_at = Some(now);
        let pending = session.pending_token_hash.clone();
        if let Some(pending) = pending {
            inner.sessions.remove(&pending);
        }
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let mut inner = self.inner.lock().await;
        let sessions_before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.expires_at > now);
        let qr_before = inner.qr_sessions.len();
        inner.qr_sessions.retain(|_, session| !session.is_expired_at(now));
        Ok(PurgeReport {
            sessions: (sessions_before - inner.sessions.len()) as u64,
            qr_sessions: (qr_before - inner.qr_sessions.len()) as u64,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::Role;
    use chrono::Duration;

    fn qr_session(token: &str, now: DateTime<Utc>) -> QrLoginSession {
        QrLoginSession {
            session_token: token.to_string(),
            user_id: Uuid::new_v4(),
            status: QrSessionStatus::Pending,
            approved_by_device_id: None,
            approved_by_device_info: None,
            login_ip: None,
            login_user_agent: None,
            pending_token_hash: None,
            created_at: now,
            expires_at: now + Duration::minutes(5),
            resolved_at: None,
            consumed_at: None,
        }
    }

    fn session(
        token_hash: Vec<u8>,
        user_id: Uuid,
        kind: SessionKind,
        now: DateTime<Utc>,
    ) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            token_hash,
            user_id,
            kind,
            ip_address: None,
            user_agent: None,
            created_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        let user = User::new("a@x.com".into(), "A".into(), "h".into(), Role::Agent);
        store.insert_user(&user).await.unwrap();

        let again = User::new("a@x.com".into(), "B".into(), "h".into(), Role::Agent);
        assert!(matches!(
            store.insert_user(&again).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn backup_code_is_consumed_once() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .replace_backup_codes(user_id, &["h1".to_string(), "h2".to_string()])
            .await
            .unwrap();

        assert!(store.consume_backup_code(user_id, "h1").await.unwrap());
        assert!(!store.consume_backup_code(user_id, "h1").await.unwrap());
        assert_eq!(
            store.backup_code_hashes(user_id).await.unwrap(),
            vec!["h2".to_string()]
        );
    }

    #[tokio::test]
    async fn session_lookup_respects_kind_and_expiry() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let record = session(vec![1, 2, 3], Uuid::new_v4(), SessionKind::Pending, now);
        store.insert_session(&record).await.unwrap();

        let found = store
            .find_session(&[1, 2, 3], SessionKind::Pending, now)
            .await
            .unwrap();
        assert!(found.is_some());
        let wrong_kind = store
            .find_session(&[1, 2, 3], SessionKind::Full, now)
            .await
            .unwrap();
        assert!(wrong_kind.is_none());
        let expired = store
            .find_session(&[1, 2, 3], SessionKind::Pending, now + Duration::minutes(11))
            .await
            .unwrap();
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn qr_session_resolves_once_and_claims_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_qr_session(&qr_session("abc", now)).await.unwrap();

        assert!(!store.claim_qr_session("abc", now).await.unwrap());
        assert!(store
            .resolve_qr_session("abc", QrSessionStatus::Approved, Some("dev"), None, now)
            .await
            .unwrap());
        assert!(!store
            .resolve_qr_session("abc", QrSessionStatus::Rejected, Some("dev"), None, now)
            .await
            .unwrap());

        assert!(store.claim_qr_session("abc", now).await.unwrap());
        assert!(!store.claim_qr_session("abc", now).await.unwrap());
    }

    #[tokio::test]
    async fn expired_qr_session_cannot_be_resolved_and_is_purged() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_qr_session(&qr_session("old", now)).await.unwrap();
        let later = now + Duration::minutes(6);

        assert!(!store
            .resolve_qr_session("old", QrSessionStatus::Approved, None, None, later)
            .await
            .unwrap());
        let report = store.purge_expired(later).await.unwrap();
        assert_eq!(report.qr_sessions, 1);
        assert!(store.find_qr_session("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claiming_deletes_the_pending_session() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        store
            .insert_session(&session(vec![7], user_id, SessionKind::Pending, now))
            .await
            .unwrap();
        let mut qr = qr_session("abc", now);
        qr.user_id = user_id;
        qr.pending_token_hash = Some(vec![7]);
        store.insert_qr_session(&qr).await.unwrap();
        store
            .resolve_qr_session("abc", QrSessionStatus::Approved, None, None, now)
            .await
            .unwrap();

        assert!(store.claim_qr_session("abc", now).await.unwrap());
        assert!(store
            .find_session(&[7], SessionKind::Pending, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sessions_are_listed_and_revoked_per_user() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut older = session(vec![1], alice, SessionKind::Full, now);
        older.created_at = now - Duration::minutes(1);
        let newer = session(vec![2], alice, SessionKind::Full, now);
        for record in [
            older.clone(),
            newer.clone(),
            session(vec![3], alice, SessionKind::Pending, now),
            session(vec![4], bob, SessionKind::Full, now),
        ] {
            store.insert_session(&record).await.unwrap();
        }

        let listed = store.list_sessions(alice, now).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        // Another user's id is not found.
        assert!(!store.delete_user_session(bob, older.id).await.unwrap());
        assert!(store.delete_user_session(alice, older.id).await.unwrap());
        assert!(!store.delete_user_session(alice, older.id).await.unwrap());

        assert_eq!(store.delete_sessions_except(alice, &[2]).await.unwrap(), 1);
        assert_eq!(store.list_sessions(alice, now).await.unwrap().len(), 1);
        assert_eq!(store.list_sessions(bob, now).await.unwrap().len(), 1);
    }
}
