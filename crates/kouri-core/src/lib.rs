//! # kouri-core
//!
//! Core types and error types for the Kouri conversational memory engine.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod message;

pub use error::{KouriError, Result};
pub use message::{ConversationTurn, Role, preview};
