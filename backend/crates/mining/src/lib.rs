//! Mining Backend Module
//!
//! Server-authoritative resource-mining engine.
//!
//! Clean Architecture structure:
//! - `domain/` - Business logic, entities, repository traits
//! - `application/` - Use cases
//! - `infra/` - Database implementations
//! - `presentation/` - HTTP handlers and the WebSocket gateway
//!
//! ## Security Model
//! - Backend is the sole authority for mining outcomes; clients only
//!   request, never decide
//! - Client-reported positions are validated against server-held node
//!   positions, never trusted
//! - Claim commits are atomic under row-level locking (no double-claim)
//! - Idempotency tokens make retried requests replay the original
//!   outcome instead of re-executing
//! - Fraud heuristics annotate the ledger after commit; they never
//!   change an outcome already returned

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::MiningConfig;
pub use error::{MiningError, MiningResult};
pub use infra::postgres::PgMiningRepository;
pub use presentation::gateway::SessionChannels;
pub use presentation::router::mining_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult, OptionExt, ResultExt},
    kind::ErrorKind,
};

#[cfg(test)]
mod tests;
