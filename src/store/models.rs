//! Records persisted by the login approval service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Account role. Only admins are eligible for second factors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    AffiliateManager,
    Agent,
    LeadManager,
    RefundsManager,
    InventoryManager,
    PendingApproval,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::AffiliateManager => "affiliate_manager",
            Self::Agent => "agent",
            Self::LeadManager => "lead_manager",
            Self::RefundsManager => "refunds_manager",
            Self::InventoryManager => "inventory_manager",
            Self::PendingApproval => "pending_approval",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "admin" => Some(Self::Admin),
            "affiliate_manager" => Some(Self::AffiliateManager),
            "agent" => Some(Self::Agent),
            "lead_manager" => Some(Self::LeadManager),
            "refunds_manager" => Some(Self::RefundsManager),
            "inventory_manager" => Some(Self::InventoryManager),
            "pending_approval" => Some(Self::PendingApproval),
            _ => None,
        }
    }
}

/// Registration review status of an account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Approved,
    Rejected,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub is_active: bool,
    pub two_factor_enabled: bool,
    /// `nonce || ciphertext` of the base32 TOTP secret.
    pub two_factor_secret: Option<Vec<u8>>,
    pub qr_auth_enabled: bool,
    pub qr_auth_device_id: Option<String>,
    pub qr_auth_device_info: Option<String>,
    pub qr_auth_device_registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(email: String, full_name: String, password_hash: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            full_name,
            password_hash,
            role,
            status: AccountStatus::Pending,
            is_active: false,
            two_factor_enabled: false,
            two_factor_secret: None,
            qr_auth_enabled: false,
            qr_auth_device_id: None,
            qr_auth_device_info: None,
            qr_auth_device_registered_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins with TOTP or QR approval enabled must pass a second factor.
    #[must_use]
    pub fn requires_second_factor(&self) -> bool {
        self.is_admin() && (self.two_factor_enabled || self.qr_auth_enabled)
    }

    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.to_string(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            two_factor_enabled: self.two_factor_enabled,
            qr_auth_enabled: self.qr_auth_enabled,
        }
    }
}

/// Public projection of a user returned by the API. Secrets never leave the store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub two_factor_enabled: bool,
    pub qr_auth_enabled: bool,
}

/// Bearer session kinds. Pending sessions only unlock the second-factor endpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionKind {
    Full,
    Pending,
}

impl SessionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Pending => "pending",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionRecord {
    /// Public handle for listing and revoking; the token hash never leaves the server.
    pub id: Uuid,
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub kind: SessionKind,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lifecycle of a QR approval session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QrSessionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl QrSessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

#[derive(Clone, Debug)]
pub struct QrLoginSession {
    pub session_token: String,
    pub user_id: Uuid,
    pub status: QrSessionStatus,
    pub approved_by_device_id: Option<String>,
    pub approved_by_device_info: Option<String>,
    pub login_ip: Option<String>,
    pub login_user_agent: Option<String>,
    /// Pending session that opened this QR session. Claiming deletes it.
    pub pending_token_hash: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once the approved session has been exchanged for a login token.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl QrLoginSession {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// A session can still be approved or rejected.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == QrSessionStatus::Pending && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn admin() -> User {
        User::new(
            "a@x.com".to_string(),
            "Alice".to_string(),
            "hash".to_string(),
            Role::Admin,
        )
    }

    #[test]
    fn second_factor_only_for_admins_with_a_factor() {
        let mut user = admin();
        assert!(!user.requires_second_factor());

        user.two_factor_enabled = true;
        assert!(user.requires_second_factor());

        user.role = Role::Agent;
        assert!(!user.requires_second_factor());

        user.role = Role::Admin;
        user.two_factor_enabled = false;
        user.qr_auth_enabled = true;
        assert!(user.requires_second_factor());
    }

    #[test]
    fn role_and_status_round_trip_through_text() {
        for role in [
            Role::Admin,
            Role::AffiliateManager,
            Role::Agent,
            Role::LeadManager,
            Role::RefundsManager,
            Role::InventoryManager,
            Role::PendingApproval,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(AccountStatus::parse("approved"), Some(AccountStatus::Approved));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn qr_session_open_only_while_pending_and_unexpired() {
        let now = Utc::now();
        let mut session = QrLoginSession {
            session_token: "t".to_string(),
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
        };
        assert!(session.is_open_at(now));
        assert!(!session.is_open_at(now + Duration::minutes(5)));

        session.status = QrSessionStatus::Rejected;
        assert!(!session.is_open_at(now));
        assert!(session.status.is_terminal());
    }

    #[test]
    fn profile_serializes_camel_case() {
        let user = admin();
        let value = serde_json::to_value(user.profile()).unwrap_or_default();
        assert_eq!(value["fullName"], "Alice");
        assert_eq!(value["role"], "admin");
        assert_eq!(value["qrAuthEnabled"], false);
    }
}
