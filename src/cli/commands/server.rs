use clap::{Arg, ArgMatches, Command};

use crate::totp::DEFAULT_ISSUER;

pub const NAME: &str = "server";

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PENDING_TTL_SECONDS: &str = "pending-ttl-seconds";
pub const ARG_QR_SESSION_TTL_SECONDS: &str = "qr-session-ttl-seconds";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_TOTP_ENCRYPTION_KEY: &str = "totp-encryption-key";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_HASH_PEPPER: &str = "hash-pepper";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";
pub const ARG_ADMIN_FULL_NAME: &str = "admin-full-name";

#[must_use]
pub fn command() -> Command {
    let command = Command::new(NAME)
        .about("Run the login approval API")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("LEADGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Postgres connection string")
                .long_help(
                    "Postgres connection string. Without it the server keeps everything in memory and loses it on restart.",
                )
                .env("LEADGATE_DSN"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for QR approval links and CORS")
                .env("LEADGATE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        );

    let command = with_session_args(command);
    let command = with_secret_args(command);
    with_admin_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Bearer session TTL in seconds")
                .env("LEADGATE_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PENDING_TTL_SECONDS)
                .long(ARG_PENDING_TTL_SECONDS)
                .help("How long a password-verified login may wait for its second factor")
                .env("LEADGATE_PENDING_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_QR_SESSION_TTL_SECONDS)
                .long(ARG_QR_SESSION_TTL_SECONDS)
                .help("QR approval session TTL in seconds")
                .env("LEADGATE_QR_SESSION_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between expired session sweeps")
                .env("LEADGATE_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_secret_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOTP_ENCRYPTION_KEY)
                .long(ARG_TOTP_ENCRYPTION_KEY)
                .help("Base64 encoded 32 byte key that encrypts TOTP secrets at rest")
                .env("LEADGATE_TOTP_ENCRYPTION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("LEADGATE_TOTP_ISSUER")
                .default_value(DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_HASH_PEPPER)
                .long(ARG_HASH_PEPPER)
                .help("Optional Argon2 secret mixed into password and backup code hashes")
                .env("LEADGATE_HASH_PEPPER")
                .hide_env_values(true),
        )
}

fn with_admin_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Create this admin account at startup if it does not exist")
                .env("LEADGATE_ADMIN_EMAIL")
                .requires(ARG_ADMIN_PASSWORD),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Password for the bootstrap admin account")
                .env("LEADGATE_ADMIN_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_ADMIN_EMAIL),
        )
        .arg(
            Arg::new(ARG_ADMIN_FULL_NAME)
                .long(ARG_ADMIN_FULL_NAME)
                .help("Display name for the bootstrap admin account")
                .env("LEADGATE_ADMIN_FULL_NAME")
                .default_value("Administrator"),
        )
}

/// Read a string argument that may be absent or blank.
#[must_use]
pub fn non_empty(matches: &ArgMatches, id: &str) -> Option<String> {
    matches
        .get_one::<String>(id)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
