//! Tool call supports.
//!
//! A [`Tool`] is registered into a [`ToolRegistry`] together with its
//! [`ToolSettings`]. The registry resolves the model's requests by name
//! and runs each handler behind its [`SafetyPolicy`]: path guards, size
//! ceilings, a deadline, a rate limit and output redaction.

mod error;
mod object;
mod policy;
mod rate_limit;
mod redact;
mod registry;

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{Error, ErrorKind};
pub use policy::{RateLimit, SafetyPolicy, resolve_path};
pub use redact::Redactor;
pub use registry::{ToolRegistry, ToolSettings, ToolSummary};

/// What a tool handler returns.
pub type ToolOutput = Result<String, Error>;

/// The outcome of one tool call, as recorded in the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the request this result answers.
    pub call_id: String,
    /// The tool output, or a human-readable error message.
    pub content: String,
    /// Set when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolResult {
    /// Creates a successful result.
    #[inline]
    pub fn success<S1: Into<String>, S2: Into<String>>(
        call_id: S1,
        content: S2,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            error_kind: None,
        }
    }

    /// Creates a failed result carrying the error message.
    #[inline]
    pub fn failure<S: Into<String>>(call_id: S, error: &Error) -> Self {
        Self {
            call_id: call_id.into(),
            content: error.to_string(),
            error_kind: Some(error.kind()),
        }
    }

    /// Returns `true` if the call failed.
    #[inline]
    pub fn failed(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// Resources a call is going to touch, declared before it runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Access {
    pub(crate) paths: Vec<PathBuf>,
    pub(crate) payload_len: Option<u64>,
}

impl Access {
    /// Declares nothing.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// Declares a filesystem path the call reads or writes.
    #[inline]
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Declares the size in bytes of the data the call writes.
    #[inline]
    pub fn with_payload_len(mut self, len: u64) -> Self {
        self.payload_len = Some(len);
        self
    }

    /// Returns the declared paths.
    #[inline]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + Send + 'static;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool. It must describe a JSON
    /// object (`"type": "object"`).
    fn parameter_schema(&self) -> &Value;

    /// Checks constraints on the input that the type alone cannot express.
    #[inline]
    fn validate(&self, _input: &Self::Input) -> Result<(), Error> {
        Ok(())
    }

    /// Declares the paths and the payload the call will touch, so the
    /// safety policy can vet them before [`Tool::execute`] runs.
    #[inline]
    fn access(&self, _input: &Self::Input) -> Access {
        Access::none()
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tool_result_serde() {
        let ok = ToolResult::success("call_1", "42");
        assert!(!ok.failed());
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "call_id": "call_1", "content": "42" })
        );

        let failed = ToolResult::failure("call_2", &Error::rate_limited());
        assert!(failed.failed());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error_kind"], "rate_limited");
        assert_eq!(
            serde_json::from_value::<ToolResult>(value).unwrap(),
            failed
        );
    }
}
