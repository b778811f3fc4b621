//! API handlers for the login approval service.
//!
//! Every endpoint answers with the `{ success, data?, message? }` envelope
//! from [`crate::api::envelope`].

pub mod auth;
pub mod health;
