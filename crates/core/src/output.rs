//! Delivery of turn progress to the caller.

use std::fmt::{self, Display};
use std::future::ready;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};
use steward_model::ToolCallRequest;

use crate::error::TurnError;
use crate::tool::ToolResult;

/// How a turn reports its progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Only the terminal event is delivered.
    Batched,
    /// Every step is delivered as soon as it completes.
    #[default]
    Streamed,
}

impl Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Batched => write!(f, "batched"),
            OutputMode::Streamed => write!(f, "streamed"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "batched" | "batch" | "off" => Ok(OutputMode::Batched),
            "streamed" | "stream" | "on" => Ok(OutputMode::Streamed),
            other => Err(format!("unknown output mode `{other}`")),
        }
    }
}

/// Progress of a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    /// The model answered with tool calls, which run next.
    AssistantStep {
        /// Text that came with the calls. Blanked if it repeats the
        /// previous step's text.
        content: String,
        /// The requested calls.
        tool_calls: Vec<ToolCallRequest>,
    },
    /// A tool call finished.
    ToolResult {
        /// Name of the tool.
        tool: String,
        /// Its result.
        result: ToolResult,
    },
    /// The turn ended with an answer.
    Final(String),
    /// The turn ended without an answer.
    Aborted(TurnError),
}

impl TurnEvent {
    /// Returns `true` for the last event of a turn.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Final(_) | TurnEvent::Aborted(_))
    }
}

/// Blanks step text that repeats the text of the previous step.
#[derive(Debug, Default)]
struct Deduper {
    last_text: Option<String>,
}

impl Deduper {
    fn apply(&mut self, event: TurnEvent) -> TurnEvent {
        match event {
            TurnEvent::AssistantStep {
                content,
                tool_calls,
            } if !content.is_empty() => {
                if self.last_text.as_deref() == Some(content.as_str()) {
                    trace!("suppressed repeated step text");
                    return TurnEvent::AssistantStep {
                        content: String::new(),
                        tool_calls,
                    };
                }
                self.last_text = Some(content.clone());
                TurnEvent::AssistantStep {
                    content,
                    tool_calls,
                }
            }
            other => other,
        }
    }
}

/// The events of one turn: lazy, finite and not restartable.
///
/// Nothing happens until the stream is first polled. Dropping the stream
/// cancels the turn, see [`crate::Agent::turn`].
pub struct TurnStream {
    inner: BoxStream<'static, TurnEvent>,
}

impl TurnStream {
    pub(crate) fn new(
        events: impl Stream<Item = TurnEvent> + Send + 'static,
        mode: OutputMode,
    ) -> Self {
        let inner = match mode {
            OutputMode::Batched => {
                events.filter(|event| ready(event.is_terminal())).boxed()
            }
            OutputMode::Streamed => events
                .scan(Deduper::default(), |deduper, event| {
                    ready(Some(deduper.apply(event)))
                })
                .boxed(),
        };
        Self { inner }
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    #[inline]
    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
