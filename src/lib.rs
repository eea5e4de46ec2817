//! SendGuard: review backend for AI-drafted outbound replies.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod realtime;
pub mod records;
pub mod store;
