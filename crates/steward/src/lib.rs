//! A terminal assistant that answers with the help of a small set of
//! guarded tools: web search, a calculator, file access, weather, host
//! information and the clock.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to drive a [`Session`] from your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod command;
pub mod config;
mod session;
pub mod tools;

pub use session::{BuildError, Reply, Session, SessionBuilder};

/// Re-exports of [`steward_core`] crate.
pub mod core {
    pub use steward_core::*;
}
