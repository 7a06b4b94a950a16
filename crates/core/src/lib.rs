//! Core logic including the reasoning loop, tool dispatch, conversation
//! state and output delivery.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod model_client;
pub mod output;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentConfig};
pub use error::{ConfigError, RegistryError, StoreError, TurnError};
pub use model_client::RetryPolicy;
pub use output::{OutputMode, TurnEvent, TurnStream};
