//! Session-authenticated portal: login, guarded file uploads and self-service
//! password changes.

pub mod account;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod csrf;
pub mod logging;
pub mod rate_limit;
pub mod server;
pub mod sessions;
pub mod templates;
pub mod upload_store;
pub mod uploads;

pub use server::router::{build_router, RouterError};
