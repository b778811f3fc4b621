use crate::{
    api::{
        self,
        handlers::auth::{
            normalize_email, valid_email, AuthConfig, AuthState, SecretHasher, WindowRateLimiter,
            PASSWORD_MIN_LEN,
        },
    },
    store::{AccountStatus, MemoryStore, PgStore, Role, Store, StoreError, User},
    totp::TotpService,
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};

/// Admin account created at startup when it does not exist yet.
#[derive(Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: SecretString,
    pub full_name: String,
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub pending_ttl_seconds: i64,
    pub qr_session_ttl_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub totp_encryption_key: SecretString,
    pub totp_issuer: String,
    pub hash_pepper: Option<SecretString>,
    pub admin: Option<BootstrapAdmin>,
}

/// Connect the store, seed the bootstrap admin and serve until shutdown.
/// # Errors
/// Returns an error if the store, the keys or the listener cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    let store = open_store(args.dsn.as_ref()).await?;

    let totp = TotpService::from_base64_key(
        args.totp_encryption_key.expose_secret(),
        args.totp_issuer.clone(),
    )?;
    let hasher = SecretHasher::new(
        args.hash_pepper
            .as_ref()
            .map(|pepper| pepper.expose_secret().as_bytes().to_vec()),
    );

    if let Some(admin) = &args.admin {
        seed_admin(store.as_ref(), &hasher, admin).await?;
    }

    let config = AuthConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_pending_ttl_seconds(args.pending_ttl_seconds)
        .with_qr_session_ttl_seconds(args.qr_session_ttl_seconds)
        .with_sweep_interval_seconds(args.sweep_interval_seconds);

    let state = Arc::new(AuthState::new(
        config,
        store,
        totp,
        hasher,
        Arc::new(WindowRateLimiter::new()),
    ));

    api::new(args.port, state).await
}

async fn open_store(dsn: Option<&SecretString>) -> Result<Arc<dyn Store>> {
    match dsn {
        Some(dsn) => {
            let store = PgStore::connect(dsn.expose_secret())
                .await
                .context("failed to connect to Postgres")?;
            store
                .migrate()
                .await
                .context("failed to apply database schema")?;
            info!("using Postgres store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no DSN configured, using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Create the admin account unless the email is already registered.
///
/// Returns `true` when a new account was inserted.
///
/// # Errors
/// Returns an error for an invalid email or password, or when the store fails.
pub async fn seed_admin(
    store: &dyn Store,
    hasher: &SecretHasher,
    admin: &BootstrapAdmin,
) -> Result<bool> {
    let email = normalize_email(&admin.email);
    if !valid_email(&email) {
        return Err(anyhow!("bootstrap admin email is invalid: {}", admin.email));
    }
    if admin.password.expose_secret().chars().count() < PASSWORD_MIN_LEN {
        return Err(anyhow!(
            "bootstrap admin password must be at least {PASSWORD_MIN_LEN} characters"
        ));
    }

    if store.find_user_by_email(&email).await?.is_some() {
        info!("bootstrap admin {email} already exists");
        return Ok(false);
    }

    let password_hash = hasher.hash(admin.password.expose_secret())?;
    let mut user = User::new(
        email.clone(),
        admin.full_name.trim().to_string(),
        password_hash,
        Role::Admin,
    );
    user.status = AccountStatus::Approved;
    user.is_active = true;

    match store.insert_user(&user).await {
        Ok(()) => {
            info!("created bootstrap admin {email}");
            Ok(true)
        }
        // Another instance seeded it first.
        Err(StoreError::Duplicate) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn admin(email: &str, password: &str) -> BootstrapAdmin {
        BootstrapAdmin {
            email: email.to_string(),
            password: SecretString::from(password.to_string()),
            full_name: " Root Admin ".to_string(),
        }
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        let hasher = SecretHasher::cheap(None);

        assert!(seed_admin(&store, &hasher, &admin(" Root@X.com ", "secret1"))
            .await
            .unwrap());
        assert!(!seed_admin(&store, &hasher, &admin("root@x.com", "other-password"))
            .await
            .unwrap());

        let user = store.find_user_by_email("root@x.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.status, AccountStatus::Approved);
        assert!(user.is_active);
        assert_eq!(user.full_name, "Root Admin");
        assert!(!user.two_factor_enabled);
        assert!(hasher.verify("secret1", &user.password_hash));
    }

    #[tokio::test]
    async fn seeding_validates_credentials() {
        let store = MemoryStore::new();
        let hasher = SecretHasher::cheap(None);

        assert!(seed_admin(&store, &hasher, &admin("not-an-email", "secret1"))
            .await
            .is_err());
        assert!(seed_admin(&store, &hasher, &admin("root@x.com", "short"))
            .await
            .is_err());
        assert!(store.find_user_by_email("root@x.com").await.unwrap().is_none());
    }
}
