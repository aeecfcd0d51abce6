//! inflamind-common — Shared types used across all Inflamind crates.

pub mod messages;

// Re-export commonly used types
pub use messages::{Citation, Message, Role};
