//! Errors that abort startup, a restore, or a turn.
//!
//! Tool-level failures are not here, see [`crate::tool::Error`]. Those
//! never escape dispatch and are reported back to the model instead.

use std::path::PathBuf;

use steward_model::ErrorKind as ModelErrorKind;

/// Failed to register a tool.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),
    /// The tool's input schema is not a JSON object schema.
    #[error("tool `{tool}` has an invalid input schema: {reason}")]
    InvalidSchema {
        /// Name of the offending tool.
        tool: String,
        /// What is wrong with the schema.
        reason: String,
    },
}

/// Failed to read, write or restore conversation state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The message sequence breaks the tool call request/result pairing.
    #[error("corrupt conversation state at message {index}: {reason}")]
    CorruptState {
        /// Position of the first offending message.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// Reading or writing a checkpoint file failed.
    #[error("checkpoint I/O failed at {}", path.display())]
    Io {
        /// The checkpoint file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A checkpoint could not be encoded or decoded.
    #[error("malformed checkpoint for thread `{thread_id}`")]
    Format {
        /// The thread the checkpoint belongs to.
        thread_id: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    #[inline]
    pub(crate) fn corrupt<S: Into<String>>(index: usize, reason: S) -> Self {
        Self::CorruptState {
            index,
            reason: reason.into(),
        }
    }
}

/// The reason a turn ended without a final answer.
///
/// The transcript accumulated so far stays in the thread, and the next
/// turn continues from it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// The model call failed with a non-transient error, or transient
    /// failures outlasted the retry budget.
    #[error("the model is unavailable ({kind:?}): {message}")]
    ModelUnavailable {
        /// Kind of the last provider error.
        kind: ModelErrorKind,
        /// Message of the last provider error.
        message: String,
    },
    /// The model kept requesting tools beyond the step limit.
    #[error("gave up after {0} model calls without a final answer")]
    StepLimitExceeded(usize),
    /// The caller cancelled the turn.
    #[error("the turn was cancelled")]
    Cancelled,
    /// The thread's checkpoint could not be read, so the turn never
    /// started.
    #[error("thread `{thread_id}` could not be loaded: {reason}")]
    ThreadUnavailable {
        /// The thread the turn was sent to.
        thread_id: String,
        /// Why its checkpoint was rejected.
        reason: String,
    },
}

/// Invalid agent configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for `{field}`: {reason}")]
pub struct ConfigError {
    /// The offending setting.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigError {
    #[inline]
    pub(crate) fn new<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
