use crate::cli::{
    actions::{
        login,
        server::{self, BootstrapAdmin},
        Action,
    },
    commands::{self, server::non_empty},
};
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;

/// Turn parsed arguments into the action to run.
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((commands::server::NAME, sub)) => Ok(Action::Server(server_args(sub)?)),
        Some((commands::login::NAME, sub)) => Ok(Action::Login(login_args(sub)?)),
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn server_args(matches: &ArgMatches) -> Result<server::Args> {
    use commands::server::{
        ARG_ADMIN_EMAIL, ARG_ADMIN_FULL_NAME, ARG_ADMIN_PASSWORD, ARG_DSN, ARG_FRONTEND_BASE_URL,
        ARG_HASH_PEPPER, ARG_PENDING_TTL_SECONDS, ARG_PORT, ARG_QR_SESSION_TTL_SECONDS,
        ARG_SESSION_TTL_SECONDS, ARG_SWEEP_INTERVAL_SECONDS, ARG_TOTP_ENCRYPTION_KEY,
        ARG_TOTP_ISSUER,
    };

    let admin = match (
        non_empty(matches, ARG_ADMIN_EMAIL),
        non_empty(matches, ARG_ADMIN_PASSWORD),
    ) {
        (Some(email), Some(password)) => Some(BootstrapAdmin {
            email,
            password: SecretString::from(password),
            full_name: non_empty(matches, ARG_ADMIN_FULL_NAME)
                .unwrap_or_else(|| "Administrator".to_string()),
        }),
        (None, None) => None,
        _ => {
            return Err(anyhow!(
                "--{ARG_ADMIN_EMAIL} and --{ARG_ADMIN_PASSWORD} must be set together"
            ))
        }
    };

    let totp_encryption_key = non_empty(matches, ARG_TOTP_ENCRYPTION_KEY)
        .with_context(|| format!("missing required argument: --{ARG_TOTP_ENCRYPTION_KEY}"))?;

    Ok(server::Args {
        port: required(matches, ARG_PORT)?,
        dsn: non_empty(matches, ARG_DSN).map(SecretString::from),
        frontend_base_url: required(matches, ARG_FRONTEND_BASE_URL)?,
        session_ttl_seconds: required(matches, ARG_SESSION_TTL_SECONDS)?,
        pending_ttl_seconds: required(matches, ARG_PENDING_TTL_SECONDS)?,
        qr_session_ttl_seconds: required(matches, ARG_QR_SESSION_TTL_SECONDS)?,
        sweep_interval_seconds: required(matches, ARG_SWEEP_INTERVAL_SECONDS)?,
        totp_encryption_key: SecretString::from(totp_encryption_key),
        totp_issuer: required(matches, ARG_TOTP_ISSUER)?,
        hash_pepper: non_empty(matches, ARG_HASH_PEPPER).map(SecretString::from),
        admin,
    })
}

fn login_args(matches: &ArgMatches) -> Result<login::Args> {
    use commands::login::{
        ARG_CODE, ARG_EMAIL, ARG_PASSWORD, ARG_POLL_INTERVAL_MS, ARG_QR_TIMEOUT_SECONDS, ARG_URL,
    };

    Ok(login::Args {
        url: required(matches, ARG_URL)?,
        email: required(matches, ARG_EMAIL)?,
        password: SecretString::from(required::<String>(matches, ARG_PASSWORD)?),
        code: non_empty(matches, ARG_CODE),
        poll_interval: Duration::from_millis(required(matches, ARG_POLL_INTERVAL_MS)?),
        qr_timeout: Duration::from_secs(required(matches, ARG_QR_TIMEOUT_SECONDS)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const KEY: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";

    fn clear_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("LEADGATE_DSN", None::<&str>),
                ("LEADGATE_HASH_PEPPER", None),
                ("LEADGATE_ADMIN_EMAIL", None),
                ("LEADGATE_ADMIN_PASSWORD", None),
                ("LEADGATE_ADMIN_FULL_NAME", None),
                ("LEADGATE_TOTP_ENCRYPTION_KEY", None),
                ("LEADGATE_PASSWORD", None),
                ("LEADGATE_POLL_INTERVAL_MS", None),
                ("LEADGATE_QR_TIMEOUT_SECONDS", None),
            ],
            f,
        );
    }

    #[test]
    fn server_action_without_dsn_or_admin() {
        clear_env(|| {
            let matches = commands::new().get_matches_from([
                "leadgate",
                "server",
                "--totp-encryption-key",
                KEY,
                "--hash-pepper",
                "  ",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 8080);
            assert!(args.dsn.is_none());
            assert!(args.hash_pepper.is_none());
            assert!(args.admin.is_none());
            assert_eq!(args.pending_ttl_seconds, 600);
            assert_eq!(args.sweep_interval_seconds, 60);
            assert_eq!(args.totp_issuer, "Lead Management Platform");
            assert_eq!(args.totp_encryption_key.expose_secret(), KEY);
        });
    }

    #[test]
    fn server_action_with_bootstrap_admin_from_env() {
        clear_env(|| {
            temp_env::with_vars(
                [
                    ("LEADGATE_TOTP_ENCRYPTION_KEY", Some(KEY)),
                    ("LEADGATE_ADMIN_EMAIL", Some("root@x.com")),
                    ("LEADGATE_ADMIN_PASSWORD", Some("secret1")),
                    ("LEADGATE_DSN", Some("postgres://localhost/leadgate")),
                ],
                || {
                    let matches = commands::new().get_matches_from(["leadgate", "server"]);
                    let Ok(Action::Server(args)) = handler(&matches) else {
                        panic!("expected server action");
                    };
                    let admin = args.admin.expect("bootstrap admin");
                    assert_eq!(admin.email, "root@x.com");
                    assert_eq!(admin.password.expose_secret(), "secret1");
                    assert_eq!(admin.full_name, "Administrator");
                    assert_eq!(
                        args.dsn.map(|dsn| dsn.expose_secret().to_string()).as_deref(),
                        Some("postgres://localhost/leadgate")
                    );
                },
            );
        });
    }

    #[test]
    fn login_action_converts_durations() {
        clear_env(|| {
            let matches = commands::new().get_matches_from([
                "leadgate",
                "login",
                "--email",
                "a@x.com",
                "--password",
                "secret1",
                "--code",
                "123456",
                "--poll-interval-ms",
                "500",
                "--qr-timeout-seconds",
                "60",
            ]);
            let Ok(Action::Login(args)) = handler(&matches) else {
                panic!("expected login action");
            };
            assert_eq!(args.url, "http://localhost:8080");
            assert_eq!(args.email, "a@x.com");
            assert_eq!(args.password.expose_secret(), "secret1");
            assert_eq!(args.code.as_deref(), Some("123456"));
            assert_eq!(args.poll_interval, Duration::from_millis(500));
            assert_eq!(args.qr_timeout, Duration::from_secs(60));
        });
    }
}
