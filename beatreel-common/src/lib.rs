//! # beatreel Common Library
//!
//! Shared code for the beatreel service crates including:
//! - Atomic JSON record persistence
//! - Progress event types and the EventBus
//! - Server-Sent Events stream helpers
//! - Configuration loading and root folder resolution
//! - Audio offset (timecode) parsing

pub mod atomic_file;
pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod timecode;

pub use error::{Error, Result};
