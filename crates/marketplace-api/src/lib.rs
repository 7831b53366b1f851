//! Marketplace API Library
//!
//! This crate provides the HTTP surface of the chunked upload engine: handlers, the
//! authentication gate, error rendering and application setup.

mod api_doc;
mod handlers;
mod telemetry;

pub mod auth;
pub mod constants;
pub mod error;
pub mod setup;
pub mod state;

// Re-exports
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
