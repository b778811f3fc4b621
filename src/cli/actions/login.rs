//! Terminal front end for the login flow.
//!
//! Prompts go to stderr, the session token to stdout, so the command can be
//! used as `TOKEN=$(leadgate login -e ...)`.

use crate::{
    api::APP_USER_AGENT,
    client::{
        AuthApi, CodeInput, CodeMode, FlowState, HttpApi, LoginFlow, PollerConfig, QrPhase,
        QrPoller, Session,
    },
};
use anyhow::{anyhow, bail, Context, Result};
use qrcode::{render::unicode, QrCode};
use secrecy::{ExposeSecret, SecretString};
use std::{io::Write, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::watch,
};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub url: String,
    pub email: String,
    pub password: SecretString,
    pub code: Option<String>,
    pub poll_interval: Duration,
    pub qr_timeout: Duration,
}

type Input = Lines<BufReader<Stdin>>;

/// Log in and print the bearer token.
/// # Errors
/// Returns an error when the login fails, is cancelled or must be restarted.
pub async fn execute(args: Args) -> Result<()> {
    let api: Arc<dyn AuthApi> = Arc::new(HttpApi::new(&args.url, APP_USER_AGENT)?);
    let mut flow = LoginFlow::new(api.clone());
    let poller_config = PollerConfig {
        poll_interval: args.poll_interval,
        timeout: args.qr_timeout,
        ..PollerConfig::default()
    };

    flow.submit_credentials(&args.email, args.password.expose_secret())
        .await
        .context("login failed")?;

    let mut input = CodeInput::default();
    let mut preset = args.code;
    if preset
        .as_deref()
        .is_some_and(|code| code.trim().len() == CodeMode::Backup.code_len())
    {
        input.toggle_mode();
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match flow.state() {
            FlowState::Idle => bail!("login cancelled"),
            FlowState::Verified(session) => {
                print_session(session);
                return Ok(());
            }
            FlowState::AwaitingQr(_) => {
                let poller = QrPoller::new(api.clone(), poller_config);
                let renderer = tokio::spawn(render_phases(poller.subscribe()));
                let finished = tokio::select! {
                    result = flow.run_qr(&poller) => result.map(|_| true),
                    _ = tokio::signal::ctrl_c() => Ok(false),
                };
                renderer.abort();
                eprintln!();

                if !finished? {
                    flow.cancel();
                    continue;
                }
                match flow.state() {
                    FlowState::Idle => bail!("pending login expired, log in again"),
                    FlowState::Failed { reason, .. } => {
                        eprintln!("{reason}. Enter a code, or q for a new QR code.");
                    }
                    _ => {}
                }
            }
            FlowState::AwaitingTotp(_) | FlowState::Failed { .. } => {
                let typed = match preset.take() {
                    Some(code) => code,
                    None => prompt(&mut lines, input.mode()).await?,
                };
                match typed.trim() {
                    "" => flow.cancel(),
                    "b" | "B" => input.toggle_mode(),
                    "q" | "Q" => flow.use_qr()?,
                    typed => {
                        let Some(code) = input.set(typed) else {
                            eprintln!("Enter {} characters.", input.mode().code_len());
                            continue;
                        };
                        if let Err(err) = flow.submit_code(code).await {
                            input.clear();
                            if err.requires_restart() {
                                return Err(anyhow!(err).context("pending login expired, log in again"));
                            }
                            eprintln!("{err}");
                        }
                    }
                }
            }
        }
    }
}

async fn prompt(lines: &mut Input, mode: CodeMode) -> Result<String> {
    let label = match mode {
        CodeMode::Totp => "6-digit authenticator code",
        CodeMode::Backup => "8-character backup code",
    };
    eprint!("{label} (b: switch code type, q: QR approval, empty: cancel): ");
    std::io::stderr().flush()?;
    // EOF cancels.
    Ok(lines.next_line().await?.unwrap_or_default())
}

async fn render_phases(mut phases: watch::Receiver<QrPhase>) {
    let mut shown_url = String::new();
    while phases.changed().await.is_ok() {
        let phase = phases.borrow_and_update().clone();
        match phase {
            QrPhase::Loading => eprintln!("Creating QR session..."),
            QrPhase::Pending {
                qr_url,
                remaining_seconds,
            } => {
                if qr_url != shown_url {
                    match render_qr(&qr_url) {
                        Ok(code) => eprintln!("{code}"),
                        Err(err) => debug!("QR rendering failed: {err}"),
                    }
                    eprintln!("Scan with your registered device or open:\n{qr_url}");
                    shown_url = qr_url;
                }
                eprint!("\rWaiting for approval, expires in {}  ", format_remaining(remaining_seconds));
                let _ = std::io::stderr().flush();
            }
            QrPhase::Approved => eprint!("\rLogin approved                           "),
            QrPhase::Rejected | QrPhase::Expired => {}
            QrPhase::Error(message) => eprintln!("\r{message}"),
        }
    }
}

/// Terminal rendering of the approval URL, two modules per character row.
fn render_qr(url: &str) -> Result<String> {
    let code = QrCode::new(url.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

fn format_remaining(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn print_session(session: &Session) {
    if let Some(user) = &session.user {
        eprintln!("Logged in as {} ({})", user.full_name, user.email);
    }
    if let Some(expires_at) = session.expires_at {
        eprintln!("Session expires at {}", expires_at.to_rfc3339());
    }
    println!("{}", session.token);
}
