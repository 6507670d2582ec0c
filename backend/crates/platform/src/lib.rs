//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Cryptographic utilities (CSPRNG, SHA-256)
//! - Client identification (origin IP, User-Agent fingerprint)
//! - Rate limiting infrastructure

pub mod client;
pub mod crypto;
pub mod rate_limit;
