//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the agent runtime to
//! interact with various model providers, so that the reasoning loop can
//! seamlessly switch between them without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. In particular,
//! a provider must be safe to retry on transient failures, and it must
//! echo back exactly the tool call ids it expects to be satisfied.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
