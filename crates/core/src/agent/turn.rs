use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use steward_model::{ModelMessage, ModelRequest, ToolCallRequest};
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;

use super::Inner;
use crate::conversation::{Message, ThreadGuard};
use crate::error::TurnError;
use crate::model_client::ModelReply;
use crate::output::TurnEvent;
use crate::tool::{Error as ToolError, ToolResult};

enum Stage {
    AwaitingModel,
    // Calls of the last assistant message that have no result yet. The
    // front call is removed only after its result is appended.
    ExecutingTools(VecDeque<ToolCallRequest>),
    Finished,
}

/// One turn on one thread, driven event by event.
///
/// The turn holds the thread's lock from [`Turn::begin`] until it is
/// dropped.
pub(crate) struct Turn {
    inner: Arc<Inner>,
    thread: ThreadGuard,
    steps: usize,
    stage: Stage,
}

impl Turn {
    /// Waits for the thread, then appends the user input. Fails without
    /// touching the thread if it cannot be loaded.
    pub async fn begin(
        inner: Arc<Inner>,
        thread_id: String,
        input: String,
    ) -> Result<Self, TurnError> {
        let mut thread = match inner.store.lock(&thread_id).await {
            Ok(thread) => thread,
            Err(err) => {
                error!("failed to load thread {thread_id}: {err}");
                return Err(TurnError::ThreadUnavailable {
                    thread_id,
                    reason: err.to_string(),
                });
            }
        };
        thread.begin_turn();
        debug!("turn {} started on thread {thread_id}", thread.turn_count());
        thread.push(Message::user(input));
        Ok(Self {
            inner,
            thread,
            steps: 0,
            stage: Stage::AwaitingModel,
        })
    }

    /// Advances the state machine to its next event. Returns `None` after
    /// the terminal event.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        loop {
            match &mut self.stage {
                Stage::Finished => return None,
                Stage::AwaitingModel => return self.ask_model().await,
                Stage::ExecutingTools(queue) => {
                    let Some(call) = queue.front().cloned() else {
                        self.stage = Stage::AwaitingModel;
                        continue;
                    };
                    let result = self.inner.registry.dispatch(&call).await;
                    self.thread.push(Message::Tool(result.clone()));
                    queue.pop_front();
                    return Some(TurnEvent::ToolResult {
                        tool: call.name,
                        result,
                    });
                }
            }
        }
    }

    async fn ask_model(&mut self) -> Option<TurnEvent> {
        let max_steps = self.inner.config.max_steps;
        if self.steps >= max_steps {
            warn!("no final answer after {max_steps} model calls");
            return self
                .finish(TurnEvent::Aborted(TurnError::StepLimitExceeded(max_steps)))
                .await;
        }
        self.steps += 1;

        let request = self.build_request();
        let reply = match self
            .inner
            .model_client
            .send_with_retry(request, &self.inner.config.retry)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                let err = TurnError::ModelUnavailable {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                return self.finish(TurnEvent::Aborted(err)).await;
            }
        };

        let ModelReply {
            content,
            tool_calls,
            ..
        } = reply;
        if tool_calls.is_empty() || !are_dispatchable(&tool_calls) {
            if !tool_calls.is_empty() {
                warn!("treating a response with malformed tool calls as final");
            }
            self.thread.push(Message::assistant(content.clone(), vec![]));
            return self.finish(TurnEvent::Final(content)).await;
        }

        trace!("step {} requested {} tool call(s)", self.steps, tool_calls.len());
        self.thread
            .push(Message::assistant(content.clone(), tool_calls.clone()));
        self.stage = Stage::ExecutingTools(tool_calls.iter().cloned().collect());
        Some(TurnEvent::AssistantStep {
            content,
            tool_calls,
        })
    }

    fn build_request(&self) -> ModelRequest {
        let history = self.thread.messages();
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.inner.system_prompt {
            messages.push(ModelMessage::System(prompt.clone()));
        }
        messages.extend(history.iter().map(Message::to_model_message));
        ModelRequest {
            messages,
            tools: self.inner.tool_definitions.clone(),
            options: self.inner.config.sampling,
        }
    }

    async fn finish(&mut self, event: TurnEvent) -> Option<TurnEvent> {
        self.stage = Stage::Finished;
        if let Err(err) = self.inner.store.save(&self.thread).await {
            warn!("failed to save thread {}: {err}", self.thread.id());
        }
        Some(event)
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.stage, Stage::Finished) {
            Stage::Finished => return,
            Stage::AwaitingModel => {}
            Stage::ExecutingTools(queue) => {
                for call in queue {
                    let err = ToolError::cancelled()
                        .with_reason("the turn was cancelled before this call finished");
                    self.thread
                        .push(Message::Tool(ToolResult::failure(&call.id, &err)));
                }
            }
        }
        info!("turn on thread {} was cancelled", self.thread.id());

        let (Some(checkpoints), Ok(handle)) =
            (self.inner.store.checkpoint_store(), Handle::try_current())
        else {
            return;
        };
        // The guard cannot leave `self`. Saving under a fresh lock writes
        // the latest state, even if the next turn gets the lock first.
        let slot = Arc::clone(OwnedMutexGuard::mutex(&self.thread));
        handle.spawn(async move {
            let thread = slot.lock().await;
            if let Err(err) = checkpoints.save(&thread).await {
                warn!("failed to save cancelled thread {}: {err}", thread.id());
            }
        });
    }
}

/// Every call needs an id, a name and decoded arguments, and ids must be
/// unique within the message, or results could not be linked back.
fn are_dispatchable(tool_calls: &[ToolCallRequest]) -> bool {
    let mut ids = HashSet::with_capacity(tool_calls.len());
    tool_calls
        .iter()
        .all(|call| call.is_well_formed() && ids.insert(call.id.as_str()))
}
