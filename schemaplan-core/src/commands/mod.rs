//! Command implementations: plan, deps, verify.

pub mod deps;
pub mod plan;
pub mod verify;
