//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (ResourceNode, MiningAttempt)
//! - Domain value objects (Position, ResourceKind, FailReason, ...)
//! - Domain services (range checks, outcome rolls, fraud heuristics)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod services;
pub mod value_objects;
