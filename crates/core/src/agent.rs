mod builder;
mod config;
mod turn;

use std::sync::Arc;

use futures_util::stream;
use steward_model::ModelTool;

use crate::conversation::ConversationStore;
use crate::error::TurnError;
use crate::model_client::ModelClient;
use crate::output::{OutputMode, TurnEvent, TurnStream};
use crate::tool::ToolRegistry;
pub use builder::AgentBuilder;
pub use config::AgentConfig;
use turn::Turn;

pub(crate) struct Inner {
    model_client: ModelClient,
    registry: Arc<ToolRegistry>,
    tool_definitions: Vec<ModelTool>,
    store: Arc<ConversationStore>,
    system_prompt: Option<String>,
    config: AgentConfig,
}

/// An agent instance, which binds a model provider, a toolset and a
/// conversation store.
///
/// The agent is cheap to clone. Turns on the same thread are processed
/// one after another in arrival order, while turns on different threads
/// run concurrently.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            system_prompt,
            config,
            registry,
            store,
        } = builder;
        let registry = registry.unwrap_or_default();
        let inner = Inner {
            model_client,
            tool_definitions: registry.definitions(),
            registry,
            store: store.unwrap_or_default(),
            system_prompt,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the conversation store.
    #[inline]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.inner.store
    }

    /// Returns the tool registry.
    #[inline]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.inner.registry
    }

    /// Returns the loop configuration.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Starts a turn and returns its events.
    ///
    /// The turn starts when the stream is first polled, after earlier
    /// turns on the same thread have finished. Dropping the stream before
    /// the terminal event cancels the turn: the running tool is aborted
    /// and every unanswered tool call is resolved with a `Cancelled`
    /// result, so the thread stays consistent.
    pub fn turn<S1, S2>(
        &self,
        thread_id: S1,
        input: S2,
        mode: OutputMode,
    ) -> TurnStream
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        enum State {
            Pending {
                inner: Arc<Inner>,
                thread_id: String,
                input: String,
            },
            Running(Turn),
            Done,
        }

        let state = State::Pending {
            inner: Arc::clone(&self.inner),
            thread_id: thread_id.into(),
            input: input.into(),
        };
        let events = stream::unfold(state, |state| async move {
            let mut turn = match state {
                State::Pending {
                    inner,
                    thread_id,
                    input,
                } => match Turn::begin(inner, thread_id, input).await {
                    Ok(turn) => turn,
                    Err(err) => return Some((TurnEvent::Aborted(err), State::Done)),
                },
                State::Running(turn) => turn,
                State::Done => return None,
            };
            let event = turn.next_event().await?;
            let next_state = if event.is_terminal() {
                State::Done
            } else {
                State::Running(turn)
            };
            Some((event, next_state))
        });
        TurnStream::new(events, mode)
    }

    /// Runs a turn to completion and returns the final answer.
    pub async fn run_turn<S1, S2>(
        &self,
        thread_id: S1,
        input: S2,
    ) -> Result<String, TurnError>
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let mut turn =
            Turn::begin(Arc::clone(&self.inner), thread_id.into(), input.into())
                .await?;
        while let Some(event) = turn.next_event().await {
            match event {
                TurnEvent::Final(answer) => return Ok(answer),
                TurnEvent::Aborted(err) => return Err(err),
                _ => {}
            }
        }
        Err(TurnError::Cancelled)
    }

    /// Like [`Agent::run_turn`], but gives up with
    /// [`TurnError::Cancelled`] once `cancel` completes.
    pub async fn run_turn_until<S1, S2, F>(
        &self,
        thread_id: S1,
        input: S2,
        cancel: F,
    ) -> Result<String, TurnError>
    where
        S1: Into<String>,
        S2: Into<String>,
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            result = self.run_turn(thread_id, input) => result,
            () = cancel => {
                info!("turn cancelled by the caller");
                Err(TurnError::Cancelled)
            }
        }
    }
}
