use std::sync::Arc;

use steward_model::ModelProvider;

use super::{Agent, AgentConfig};
use crate::conversation::ConversationStore;
use crate::error::ConfigError;
use crate::model_client::ModelClient;
use crate::tool::ToolRegistry;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) system_prompt: Option<String>,
    pub(crate) config: AgentConfig,
    pub(crate) registry: Option<Arc<ToolRegistry>>,
    pub(crate) store: Option<Arc<ConversationStore>>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            config: AgentConfig::default(),
            registry: None,
            store: None,
        }
    }

    /// Sets the instructions sent ahead of every conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Replaces the loop configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the tools available to the model. Defaults to none.
    #[inline]
    pub fn with_registry<R: Into<Arc<ToolRegistry>>>(mut self, registry: R) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Sets the store holding the threads. Defaults to an in-memory store.
    #[inline]
    pub fn with_store<S: Into<Arc<ConversationStore>>>(mut self, store: S) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Result<Agent, ConfigError> {
        self.config.validate()?;
        Ok(Agent::from_builder(self))
    }
}
