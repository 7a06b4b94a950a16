use std::fmt::Write as _;
use std::sync::Arc;

use steward_core::conversation::{ConversationStore, FileCheckpointStore, Message};
use steward_core::tool::{Redactor, ToolRegistry};
use steward_core::{
    Agent, AgentBuilder, ConfigError, OutputMode, RegistryError, StoreError,
    TurnError, TurnStream,
};
use steward_model::ModelProvider;
use thiserror::Error;

use crate::command::{Command, HELP};
use crate::config::{AppConfig, tool_settings};
use crate::tools::*;

const HISTORY_LIMIT: usize = 10;
const HISTORY_PREVIEW_CHARS: usize = 100;

type RegisterFn =
    Box<dyn FnOnce(&mut ToolRegistry, &AppConfig) -> Result<(), RegistryError> + Send>;

/// Why a session could not be built.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A tool could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The loop configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    config: AppConfig,
    system_prompt: Option<String>,
    store: Option<Arc<ConversationStore>>,
    redactor: Option<Redactor>,
    register_search: Option<RegisterFn>,
    weather: Arc<dyn WeatherSource>,
    probe: Arc<dyn SystemProbe>,
    clock: Arc<dyn Clock>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            config: AppConfig::default(),
            system_prompt: None,
            store: None,
            redactor: None,
            register_search: None,
            weather: Arc::new(MockWeather),
            probe: Arc::new(HostProbe),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the application configuration.
    #[inline]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the system prompt for the agent, replacing the configured and
    /// the built-in ones.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Uses `store` instead of the one derived from the `[memory]` section.
    #[inline]
    pub fn with_store<S: Into<Arc<ConversationStore>>>(mut self, store: S) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Sets how tool output is redacted. Defaults to the current user's
    /// home directory.
    #[inline]
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Provides the search tool. Without a backend the tool is not
    /// registered.
    pub fn with_search_backend<B: SearchBackend>(mut self, backend: B) -> Self {
        let register = move |registry: &mut ToolRegistry, config: &AppConfig| {
            registry.register(
                SearchTool::new(backend, config.search.max_results),
                tool_settings(&config.tools.search, 1, config.base_policy()),
            )
        };
        self.register_search = Some(Box::new(register));
        self
    }

    /// Replaces the weather data source.
    #[inline]
    pub fn with_weather_source<S: WeatherSource>(mut self, source: S) -> Self {
        self.weather = Arc::new(source);
        self
    }

    /// Replaces the host probe.
    #[inline]
    pub fn with_system_probe<P: SystemProbe>(mut self, probe: P) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Replaces the clock.
    #[inline]
    pub fn with_clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Result<Session, BuildError> {
        let Self {
            agent_builder,
            config,
            system_prompt,
            store,
            redactor,
            register_search,
            weather,
            probe,
            clock,
        } = self;

        let mut registry =
            ToolRegistry::with_redactor(redactor.unwrap_or_else(Redactor::from_env));
        match register_search {
            Some(register) => register(&mut registry, &config)?,
            None if config.tools.search.enabled => {
                warn!("no search backend is configured, the search tool is unavailable");
            }
            None => {}
        }
        let tools = &config.tools;
        registry.register(
            CalculatorTool::new(),
            tool_settings(&tools.calculator, 2, config.base_policy()),
        )?;
        registry.register(
            FileOpsTool::new(&config.file_operations),
            tool_settings(&tools.file_ops, 3, config.file_policy()),
        )?;
        registry.register(
            WeatherTool::new(weather),
            tool_settings(&tools.weather, 4, config.base_policy()),
        )?;
        let mut system_policy = config.base_policy();
        system_policy.redact_output = tools.system.sensitive_info_filter;
        registry.register(
            SystemInfoTool::new(probe),
            tool_settings(&tools.system.toggle, 5, system_policy),
        )?;
        registry.register(
            GetTimeTool::new(clock, config.utc_offset()),
            tool_settings(&tools.time.toggle, 6, config.base_policy()),
        )?;

        let store = store.unwrap_or_else(|| {
            let store = if config.memory.persist {
                ConversationStore::with_checkpoint_store(FileCheckpointStore::new(
                    &config.memory.directory,
                ))
            } else {
                ConversationStore::new()
            };
            Arc::new(store)
        });
        let system_prompt = system_prompt
            .or_else(|| config.agent.system_prompt.clone())
            .unwrap_or_else(default_system_prompt);

        let agent = agent_builder
            .with_system_prompt(system_prompt)
            .with_config(config.agent_config())
            .with_registry(registry)
            .with_store(store)
            .build()?;

        let mode = if config.agent.streaming {
            OutputMode::Streamed
        } else {
            OutputMode::Batched
        };
        Ok(Session {
            agent,
            thread_id: config.agent.default_thread.clone(),
            mode,
            config,
        })
    }
}

fn default_system_prompt() -> String {
    include_str!("./system_prompt.md").replace("{{HOST_OS}}", std::env::consts::OS)
}

/// What the caller should do after a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Show this text.
    Text(String),
    /// Clear the screen.
    ClearScreen,
    /// End the session.
    Exit,
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent, the thread it talks on and
/// the output mode. Commands change only the session, never the threads.
pub struct Session {
    agent: Agent,
    config: AppConfig,
    thread_id: String,
    mode: OutputMode,
}

impl Session {
    /// Returns the agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Returns the configuration the session was built with.
    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns the current thread id.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns the current output mode.
    #[inline]
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Changes the output mode of the following turns.
    #[inline]
    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.mode = mode;
    }

    /// Switches to another thread. If the thread is not in memory yet and
    /// persistence is on, its checkpoint is loaded. Returns whether a
    /// checkpoint was loaded.
    pub async fn switch_thread<S: Into<String>>(
        &mut self,
        thread_id: S,
    ) -> Result<bool, StoreError> {
        let thread_id = thread_id.into();
        let store = self.agent.store();
        let loaded = if store.thread_ids().contains(&thread_id) {
            false
        } else {
            store.load(&thread_id).await?
        };
        self.thread_id = thread_id;
        Ok(loaded)
    }

    /// Sends a message on the current thread and returns the turn's
    /// events in the current output mode.
    #[inline]
    pub fn send(&self, message: &str) -> TurnStream {
        self.agent.turn(&*self.thread_id, message, self.mode)
    }

    /// Sends a message on the current thread and waits for the answer.
    #[inline]
    pub async fn ask(&self, message: &str) -> Result<String, TurnError> {
        self.agent.run_turn(&*self.thread_id, message).await
    }

    /// Returns the last `limit` messages of the current thread.
    pub async fn history(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.agent.store().snapshot(&self.thread_id).await?;
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
        Ok(messages)
    }

    /// Runs a command.
    pub async fn execute(&mut self, command: Command) -> Result<Reply, StoreError> {
        let text = match command {
            Command::Help => HELP.to_owned(),
            Command::Clear => return Ok(Reply::ClearScreen),
            Command::Exit => return Ok(Reply::Exit),
            Command::Config => self.describe_config(),
            Command::Thread(None) => format!("Current thread: {}", self.thread_id),
            Command::Thread(Some(thread_id)) => {
                let loaded = self.switch_thread(thread_id).await?;
                let len = self.agent.store().snapshot(&self.thread_id).await?.len();
                if loaded {
                    format!(
                        "Switched to thread {} (restored {len} messages)",
                        self.thread_id
                    )
                } else {
                    format!("Switched to thread {} ({len} messages)", self.thread_id)
                }
            }
            Command::History => {
                let history = self.history(HISTORY_LIMIT).await?;
                if history.is_empty() {
                    format!("Thread {} has no messages yet", self.thread_id)
                } else {
                    history.iter().map(preview).collect::<Vec<_>>().join("\n")
                }
            }
            Command::Stream(None) => format!("Output mode: {}", self.mode),
            Command::Stream(Some(mode)) => {
                self.mode = mode;
                format!("Output mode set to {mode}")
            }
        };
        Ok(Reply::Text(text))
    }

    fn describe_config(&self) -> String {
        let llm = &self.config.llm;
        let agent = self.agent.config();
        let mut text = String::new();
        _ = writeln!(text, "Model: {}", llm.model_name());
        if let Some(base_url) = &llm.base_url {
            _ = writeln!(text, "Endpoint: {base_url}");
        }
        _ = writeln!(
            text,
            "Sampling: temperature {}, top_p {}, max_tokens {}",
            llm.temperature, llm.top_p, llm.max_tokens
        );
        _ = writeln!(
            text,
            "Max steps: {}, model retries: {}",
            agent.max_steps, agent.retry.max_retries
        );
        _ = writeln!(text, "Tools:");
        for tool in self.agent.registry().describe() {
            let mark = if tool.enabled { "x" } else { " " };
            _ = writeln!(
                text,
                "  [{mark}] {:<16} priority {}",
                tool.name, tool.priority
            );
        }
        _ = writeln!(text, "Thread: {}", self.thread_id);
        _ = writeln!(text, "Output mode: {}", self.mode);
        if self.agent.store().is_persistent() {
            _ = write!(
                text,
                "Memory: saved to {}",
                self.config.memory.directory.display()
            );
        } else {
            _ = write!(text, "Memory: in-process only");
        }
        text
    }
}

/// One line per message, cut at a fixed number of characters.
fn preview(message: &Message) -> String {
    let content = match message {
        Message::Assistant {
            content,
            tool_calls,
        } if content.trim().is_empty() && !tool_calls.is_empty() => {
            let names: Vec<_> = tool_calls.iter().map(|call| call.name.as_str()).collect();
            format!("(calls {})", names.join(", "))
        }
        _ => message.content().replace('\n', " "),
    };
    let mut chars = content.chars();
    let mut line: String = chars.by_ref().take(HISTORY_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        line.push_str("...");
    }
    format!("[{}] {line}", message.role())
}

#[cfg(test)]
mod tests {
    use steward_core::tool::ToolResult;
    use steward_model::ToolCallRequest;
    use steward_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    fn session(config: AppConfig) -> Session {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::text("Hello!"));
        SessionBuilder::with_model_provider(provider)
            .with_config(config)
            .with_redactor(Redactor::default())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builtin_tools() {
        let session = session(AppConfig::default());
        let tools = session.agent().registry().describe();
        let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
        // No search backend was given.
        assert_eq!(
            names,
            ["calculator", "file_operations", "get_time", "system_info", "weather"]
        );
        assert_eq!(session.thread_id(), "1");
        assert_eq!(session.output_mode(), OutputMode::Streamed);
    }

    #[tokio::test]
    async fn test_commands_do_not_touch_threads() {
        let mut config = AppConfig::default();
        config.tools.weather.enabled = false;
        let mut session = session(config);
        assert_eq!(session.ask("Hi").await.unwrap(), "Hello!");

        let Reply::Text(text) = session.execute(Command::Config).await.unwrap() else {
            panic!("expected text");
        };
        assert!(text.contains("Model: deepseek-chat"));
        assert!(text.contains("[ ] weather"));
        assert!(text.contains("[x] calculator"));

        let Reply::Text(text) = session.execute(Command::History).await.unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text, "[user] Hi\n[assistant] Hello!");

        let reply = session
            .execute(Command::Stream(Some(OutputMode::Batched)))
            .await
            .unwrap();
        assert_eq!(reply, Reply::Text("Output mode set to batched".to_owned()));
        assert_eq!(session.output_mode(), OutputMode::Batched);

        let reply = session
            .execute(Command::Thread(Some("work".to_owned())))
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Text("Switched to thread work (0 messages)".to_owned())
        );
        let Reply::Text(text) = session.execute(Command::History).await.unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text, "Thread work has no messages yet");

        session.switch_thread("1").await.unwrap();
        assert_eq!(session.history(10).await.unwrap().len(), 2);
        assert_eq!(session.execute(Command::Exit).await.unwrap(), Reply::Exit);
    }

    #[test]
    fn test_preview() {
        let long = "x".repeat(150);
        assert_eq!(
            preview(&Message::user(long)),
            format!("[user] {}...", "x".repeat(100))
        );
        let call = ToolCallRequest {
            id: "call_1".to_owned(),
            name: "calculator".to_owned(),
            arguments: serde_json::json!({ "expression": "1 + 1" }),
        };
        assert_eq!(
            preview(&Message::assistant("", vec![call])),
            "[assistant] (calls calculator)"
        );
        assert_eq!(
            preview(&Message::Tool(ToolResult::success("call_1", "1 + 1\n= 2"))),
            "[tool] 1 + 1 = 2"
        );
    }

    #[tokio::test]
    async fn test_switch_thread_loads_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.memory.persist = true;
        config.memory.directory = dir.path().to_path_buf();

        let first = session(config.clone());
        first.ask("Hi").await.unwrap();
        assert!(dir.path().join("1.json").exists());

        let mut second = session(config);
        assert!(second.switch_thread("1").await.unwrap());
        assert_eq!(
            second.history(10).await.unwrap(),
            first.history(10).await.unwrap()
        );
    }
}
