//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use steward_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    finish_reason: ModelFinishReason,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            let event = if this.event_idx < this.events.len() {
                match &this.events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::ToolCall(req) => {
                        ModelResponseEvent::ToolCall(req.clone())
                    }
                }
            } else if this.event_idx == this.events.len() {
                ModelResponseEvent::Completed(this.finish_reason)
            } else {
                // In case this method is called after completion.
                return Poll::Ready(Ok(None));
            };
            this.event_idx += 1;
            return Poll::Ready(Ok(Some(event)));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Clone, Debug)]
enum ConversationStep {
    UserInput,
    AssistantResponse(PresetResponse),
    ToolResult,
}

#[derive(Default)]
struct Shared {
    attempts: HashMap<usize, u64>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. The added steps will be
/// selected according to the number of non-system history messages in your
/// request. If there are no enough steps in the script and no fallback
/// response is set, an error will be returned.
///
/// Clones share the failure counters and the request log.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    fallback: Option<PresetResponse>,
    delay: Option<Duration>,
    shared: Arc<Mutex<Shared>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    /// Adds a step for a tool result message. One step is needed for each
    /// tool call the previous assistant response requested.
    #[inline]
    pub fn add_tool_result_step(&mut self) {
        self.conversation_script.push(ConversationStep::ToolResult);
    }

    /// Sets the response used for every request beyond the script.
    #[inline]
    pub fn set_fallback_response(&mut self, preset: PresetResponse) {
        self.fallback = Some(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far, including failed ones.
    pub fn received_requests(&self) -> Vec<ModelRequest> {
        self.shared
            .lock()
            .map(|shared| shared.requests.clone())
            .unwrap_or_default()
    }

    fn select_preset(&self, req: &ModelRequest) -> Result<PresetResponse, Error> {
        let step_idx = req
            .messages
            .iter()
            .filter(|msg| !matches!(msg, ModelMessage::System(_)))
            .count();

        let preset = match self.conversation_script.get(step_idx) {
            Some(ConversationStep::AssistantResponse(preset)) => preset,
            Some(ConversationStep::UserInput | ConversationStep::ToolResult) => {
                return Err(Error {
                    message: "not an assistant response step",
                    kind: ErrorKind::InvalidRequest,
                });
            }
            None => match &self.fallback {
                Some(preset) => preset,
                None => {
                    return Err(Error {
                        message: "no enough steps",
                        kind: ErrorKind::Other,
                    });
                }
            },
        };

        let mut shared = self.shared.lock().map_err(|_| Error {
            message: "poisoned",
            kind: ErrorKind::Other,
        })?;
        shared.requests.push(req.clone());
        let attempts = shared.attempts.entry(step_idx).or_default();
        *attempts += 1;
        if let Some(failures) = preset.failures {
            if failures == 0 || *attempts <= failures {
                return Err(Error {
                    message: "injected failure",
                    kind: preset.failure_kind.unwrap_or(ErrorKind::Unavailable),
                });
            }
        }
        Ok(preset.clone())
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let delay = self.delay.unwrap_or(Duration::from_millis(1));
        let result = self.select_preset(req).map(|preset| {
            let finish_reason = if preset.has_tool_call() {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            };
            TestModelResponse {
                events: preset.events,
                finish_reason,
                event_idx: 0,
                delay,
                sleep: None,
            }
        });
        ready(result)
    }
}

impl Debug for TestModelProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModelProvider")
            .field("conversation_script", &self.conversation_script)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
