//! Login approval for an admin back office.
//!
//! A password check is followed, for admins who opted in, by a second factor:
//! a TOTP code, a single-use backup code, or approval from a registered
//! device that scans a QR code.
//!
//! - [`api`]: the axum HTTP service.
//! - [`client`]: the login state machine and QR poller that drive it.
//! - [`store`]: Postgres and in-memory persistence.
//! - [`totp`]: TOTP enrollment and verification with encrypted secrets.
//! - [`cli`]: the `leadgate` binary.

pub mod api;
pub mod cli;
pub mod client;
pub mod store;
pub mod totp;
