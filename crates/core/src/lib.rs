//! Flowmail Core - Domain logic and models
//!
//! This crate contains the domain types shared by every Flowmail service:
//! entity models, typed identifiers, the repository contracts (ports) the
//! execution fabric is written against, and the clock service.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod types;

#[cfg(feature = "test-util")]
pub mod memory;

pub use clock::{Clock, SystemClock};
pub use error::CoreError;
