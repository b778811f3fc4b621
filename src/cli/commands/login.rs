use clap::{Arg, Command};

pub const NAME: &str = "login";

pub const ARG_URL: &str = "url";
pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_CODE: &str = "code";
pub const ARG_POLL_INTERVAL_MS: &str = "poll-interval-ms";
pub const ARG_QR_TIMEOUT_SECONDS: &str = "qr-timeout-seconds";

#[must_use]
pub fn command() -> Command {
    Command::new(NAME)
        .about("Log in against a leadgate server and print the session token")
        .arg(
            Arg::new(ARG_URL)
                .short('u')
                .long(ARG_URL)
                .help("Server base URL")
                .env("LEADGATE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_EMAIL)
                .short('e')
                .long(ARG_EMAIL)
                .help("Account email")
                .env("LEADGATE_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long(ARG_PASSWORD)
                .help("Account password")
                .env("LEADGATE_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_CODE)
                .short('c')
                .long(ARG_CODE)
                .help("TOTP or backup code to submit without prompting"),
        )
        .arg(
            Arg::new(ARG_POLL_INTERVAL_MS)
                .long(ARG_POLL_INTERVAL_MS)
                .help("QR approval poll interval in milliseconds")
                .env("LEADGATE_POLL_INTERVAL_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(100..)),
        )
        .arg(
            Arg::new(ARG_QR_TIMEOUT_SECONDS)
                .long(ARG_QR_TIMEOUT_SECONDS)
                .help("Give up on QR approval after this many seconds")
                .env("LEADGATE_QR_TIMEOUT_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
