//! Conversation-related types.
//!
//! Every thread is an append-only list of [`Message`]s. The
//! [`ConversationStore`] owns the threads of a process and hands out
//! exclusive access to one of them for the duration of a turn.

mod persist;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use steward_model::{AssistantMessage, ModelMessage, ToolCallRequest, ToolCallResult};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::tool::ToolResult;
pub use persist::{CheckpointStore, FileCheckpointStore};

/// The thread used when the caller does not pick one.
pub const DEFAULT_THREAD_ID: &str = "1";

/// One message in a thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// A user input.
    User {
        /// The input text.
        content: String,
    },
    /// A model response, optionally requesting tool calls.
    Assistant {
        /// The response text.
        content: String,
        /// Tool calls to be answered before the model is asked again.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// The answer to one tool call.
    Tool(ToolResult),
}

impl Message {
    /// Creates a user message.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[inline]
    pub fn assistant<S: Into<String>>(
        content: S,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    /// Returns the role name.
    #[inline]
    pub fn role(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool(_) => "tool",
        }
    }

    /// Returns the text content.
    #[inline]
    pub fn content(&self) -> &str {
        match self {
            Message::User { content } | Message::Assistant { content, .. } => {
                content
            }
            Message::Tool(result) => &result.content,
        }
    }

    pub(crate) fn to_model_message(&self) -> ModelMessage {
        match self {
            Message::User { content } => ModelMessage::User(content.clone()),
            Message::Assistant {
                content,
                tool_calls,
            } => ModelMessage::Assistant(AssistantMessage {
                content: content.clone(),
                tool_calls: tool_calls.clone(),
            }),
            Message::Tool(result) => ModelMessage::Tool(ToolCallResult {
                id: result.call_id.clone(),
                content: result.content.clone(),
            }),
        }
    }
}

/// An independent, caller-identified conversation history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(rename = "thread_id")]
    id: String,
    messages: Vec<Message>,
    #[serde(default)]
    turn_count: u64,
    // Set once the checkpoint, if any, has been read into memory.
    #[serde(skip)]
    synced: bool,
}

impl Thread {
    /// Creates an empty thread.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            messages: vec![],
            turn_count: 0,
            synced: false,
        }
    }

    /// Returns the thread id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the messages in append order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns how many turns have started on this thread.
    #[inline]
    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    #[inline]
    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[inline]
    pub(crate) fn begin_turn(&mut self) {
        self.turn_count += 1;
    }
}

/// Exclusive access to one thread.
pub type ThreadGuard = OwnedMutexGuard<Thread>;

/// The per-process set of threads.
///
/// Threads are created on first use and never removed. A persistent store
/// fills a new thread from its checkpoint on first access. Each thread
/// sits behind its own FIFO async mutex, so turns on one thread run
/// strictly in arrival order while other threads proceed concurrently.
#[derive(Default)]
pub struct ConversationStore {
    threads: Mutex<HashMap<String, Arc<AsyncMutex<Thread>>>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl ConversationStore {
    /// Creates an in-memory store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that can persist threads into `checkpoints`.
    #[inline]
    pub fn with_checkpoint_store<C: CheckpointStore>(checkpoints: C) -> Self {
        Self {
            threads: Default::default(),
            checkpoints: Some(Arc::new(checkpoints)),
        }
    }

    /// Returns `true` if threads can be persisted.
    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.checkpoints.is_some()
    }

    fn slot(&self, thread_id: &str) -> Arc<AsyncMutex<Thread>> {
        let mut threads =
            self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            threads
                .entry(thread_id.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Thread::new(thread_id)))),
        )
    }

    /// Waits for exclusive access to a thread, creating it if absent.
    ///
    /// The first access to a thread of a persistent store reads its
    /// checkpoint, so the thread continues where it was saved instead of
    /// starting over and overwriting it. Fails only if that checkpoint
    /// cannot be read, leaving the thread unloaded.
    pub async fn lock(&self, thread_id: &str) -> Result<ThreadGuard, StoreError> {
        let mut thread = self.slot(thread_id).lock_owned().await;
        if !thread.synced {
            if let Some(checkpoints) = &self.checkpoints {
                hydrate(checkpoints.as_ref(), &mut thread).await?;
            }
            thread.synced = true;
        }
        Ok(thread)
    }

    /// Appends a message to a thread, creating it if absent.
    pub async fn append(&self, thread_id: &str, message: Message) -> Result<(), StoreError> {
        self.lock(thread_id).await?.push(message);
        Ok(())
    }

    /// Returns a copy of a thread's messages.
    pub async fn snapshot(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self.lock(thread_id).await?.messages.clone())
    }

    /// Replaces a thread's messages wholesale.
    ///
    /// The sequence must keep every tool call answered exactly once by
    /// the messages that follow its request, else nothing is changed.
    /// The restored messages take the place of any checkpoint.
    pub async fn restore(
        &self,
        thread_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        validate_pairing(&messages)?;
        let mut thread = self.slot(thread_id).lock_owned().await;
        thread.turn_count = count_turns(&messages);
        thread.messages = messages;
        thread.synced = true;
        Ok(())
    }

    /// Lists the ids of the threads known to this process.
    pub fn thread_ids(&self) -> Vec<String> {
        let threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = threads.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Restores a thread from its checkpoint, replacing what is in memory.
    /// Returns `false` if the store is not persistent or there is no
    /// checkpoint yet.
    pub async fn load(&self, thread_id: &str) -> Result<bool, StoreError> {
        let Some(checkpoints) = &self.checkpoints else {
            return Ok(false);
        };
        let mut thread = self.slot(thread_id).lock_owned().await;
        hydrate(checkpoints.as_ref(), &mut thread).await
    }

    /// Saves a thread to its checkpoint. Does nothing if the store is not
    /// persistent.
    pub async fn checkpoint(&self, thread_id: &str) -> Result<(), StoreError> {
        let thread = self.lock(thread_id).await?;
        self.save(&thread).await
    }

    pub(crate) async fn save(&self, thread: &Thread) -> Result<(), StoreError> {
        match &self.checkpoints {
            Some(checkpoints) => checkpoints.save(thread).await,
            None => Ok(()),
        }
    }

    pub(crate) fn checkpoint_store(&self) -> Option<Arc<dyn CheckpointStore>> {
        self.checkpoints.clone()
    }
}

/// Replaces the thread with its checkpoint, if there is one.
async fn hydrate(
    checkpoints: &dyn CheckpointStore,
    thread: &mut Thread,
) -> Result<bool, StoreError> {
    let Some(saved) = checkpoints.load(&thread.id).await? else {
        thread.synced = true;
        return Ok(false);
    };
    validate_pairing(&saved.messages)?;
    thread.messages = saved.messages;
    thread.turn_count = saved.turn_count;
    thread.synced = true;
    debug!(
        "loaded thread {} with {} messages",
        thread.id,
        thread.messages.len()
    );
    Ok(true)
}

fn count_turns(messages: &[Message]) -> u64 {
    messages
        .iter()
        .filter(|msg| matches!(msg, Message::User { .. }))
        .count() as u64
}

/// Checks that every tool call is answered exactly once before the
/// conversation moves on.
pub fn validate_pairing(messages: &[Message]) -> Result<(), StoreError> {
    let mut pending: HashSet<&str> = HashSet::new();
    for (index, msg) in messages.iter().enumerate() {
        match msg {
            Message::User { .. } | Message::Assistant { .. }
                if !pending.is_empty() =>
            {
                return Err(StoreError::corrupt(
                    index,
                    format!(
                        "{} message before {} tool call(s) were answered",
                        msg.role(),
                        pending.len()
                    ),
                ));
            }
            Message::User { .. } => {}
            Message::Assistant { tool_calls, .. } => {
                for call in tool_calls {
                    if !pending.insert(call.id.as_str()) {
                        return Err(StoreError::corrupt(
                            index,
                            format!("duplicate tool call id `{}`", call.id),
                        ));
                    }
                }
            }
            Message::Tool(result) => {
                if !pending.remove(result.call_id.as_str()) {
                    return Err(StoreError::corrupt(
                        index,
                        format!(
                            "result for unknown tool call `{}`",
                            result.call_id
                        ),
                    ));
                }
            }
        }
    }
    if !pending.is_empty() {
        return Err(StoreError::corrupt(
            messages.len(),
            format!("{} tool call(s) were never answered", pending.len()),
        ));
    }
    Ok(())
}
