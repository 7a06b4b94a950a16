//! Application configuration.
//!
//! Settings come from a TOML file (every key is optional) and a few
//! environment variables holding endpoints and credentials.

use std::env;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use steward_core::conversation::DEFAULT_THREAD_ID;
use steward_core::tool::{RateLimit, SafetyPolicy, ToolSettings};
use steward_core::{AgentConfig, RetryPolicy};
use steward_model::SamplingOptions;

/// The file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "steward.toml";

const DEFAULT_MODEL: &str = "deepseek-chat";

/// Root of `steward.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model endpoint and sampling.
    pub llm: LlmConfig,
    /// Reasoning loop and session defaults.
    pub agent: AgentSection,
    /// Web search.
    pub search: SearchConfig,
    /// The file tool.
    pub file_operations: FileOpsConfig,
    /// Guards shared by every tool.
    pub security: SecurityConfig,
    /// Thread persistence.
    pub memory: MemoryConfig,
    /// Per-tool switches.
    pub tools: ToolsConfig,
}

/// The `[llm]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Overridden by `OPENAI_MODEL`.
    pub model: Option<String>,
    /// Overridden by `OPENAI_BASE_URL`.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound of generated tokens.
    pub max_tokens: u32,
    /// Nucleus sampling probability mass.
    pub top_p: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            temperature: 0.1,
            max_tokens: 2000,
            top_p: 0.9,
        }
    }
}

impl LlmConfig {
    /// Returns the model name in effect.
    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// The `[agent]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Model calls allowed in one turn.
    pub max_steps: usize,
    /// Retries of transient model failures.
    pub max_retries: u32,
    /// Whether turns start in streamed mode.
    pub streaming: bool,
    /// The thread a session starts on.
    pub default_thread: String,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_retries: 3,
            streaming: true,
            default_thread: DEFAULT_THREAD_ID.to_owned(),
            system_prompt: None,
        }
    }
}

/// How thoroughly the search provider looks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    /// Fast, shallow results.
    Basic,
    /// Slower, more relevant results.
    #[default]
    Advanced,
}

impl SearchDepth {
    /// Returns the name used on the wire.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

/// The `[search]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned per query.
    pub max_results: u32,
    /// Search depth.
    pub search_depth: SearchDepth,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            search_depth: SearchDepth::Advanced,
            timeout_ms: 30_000,
        }
    }
}

/// The `[file_operations]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOpsConfig {
    /// Largest file read or written, in bytes.
    pub max_file_size: u64,
    /// Copy a file to `<path>.backup` before overwriting it.
    pub backup_enabled: bool,
}

impl Default for FileOpsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            backup_enabled: true,
        }
    }
}

/// The `[security]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// The file tool may only touch paths under these.
    pub allowed_directories: Vec<PathBuf>,
    /// The file tool may never touch paths under these.
    pub blocked_directories: Vec<PathBuf>,
    /// Deadline of one tool call, in milliseconds.
    pub max_execution_time_ms: u64,
    /// Calls allowed per tool and minute.
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_directories: ["./data", "./output", "./temp"]
                .map(PathBuf::from)
                .into(),
            blocked_directories: ["/etc", "/usr", "/var", "/system"]
                .map(PathBuf::from)
                .into(),
            max_execution_time_ms: 60_000,
            rate_limit_per_minute: 60,
        }
    }
}

/// The `[memory]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Save every thread after each turn.
    pub persist: bool,
    /// Where checkpoints are written.
    pub directory: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persist: false,
            directory: PathBuf::from("./memory"),
        }
    }
}

/// Switches shared by every `[tools.<name>]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolToggle {
    /// Whether the tool is offered to the model.
    pub enabled: bool,
    /// Lower values are advertised first. Each tool has its own default.
    pub priority: Option<i32>,
}

impl Default for ToolToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
        }
    }
}

/// The `[tools.system]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemToolConfig {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub toggle: ToolToggle,
    /// Mask the home directory and credentials in the report.
    pub sensitive_info_filter: bool,
}

impl Default for SystemToolConfig {
    fn default() -> Self {
        Self {
            toggle: ToolToggle::default(),
            sensitive_info_filter: true,
        }
    }
}

/// The `[tools.time]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeToolConfig {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub toggle: ToolToggle,
    /// Offset the time is reported in, like `+08:00`.
    pub utc_offset: String,
}

impl Default for TimeToolConfig {
    fn default() -> Self {
        Self {
            toggle: ToolToggle::default(),
            utc_offset: "+08:00".to_owned(),
        }
    }
}

/// The `[tools]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ToolsConfig {
    pub search: ToolToggle,
    pub calculator: ToolToggle,
    pub file_ops: ToolToggle,
    pub weather: ToolToggle,
    pub system: SystemToolConfig,
    pub time: TimeToolConfig,
}

/// Endpoints and credentials read from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
    /// `OPENAI_BASE_URL`.
    pub openai_base_url: Option<String>,
    /// `OPENAI_MODEL`.
    pub openai_model: Option<String>,
    /// `TAVILY_API_KEY`.
    pub tavily_api_key: Option<String>,
}

impl Credentials {
    /// Reads the variables, treating empty values as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            openai_model: var("OPENAI_MODEL"),
            tavily_api_key: var("TAVILY_API_KEY"),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("tavily_api_key", &mask(&self.tavily_api_key))
            .finish()
    }
}

impl AppConfig {
    /// Loads the configuration from `path`, or from [`DEFAULT_CONFIG_PATH`]
    /// if it exists. An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        if !required && !config_path.exists() {
            debug!("{} not found, using defaults", config_path.display());
            return Ok(Self::default());
        }

        debug!("loading config from {}", config_path.display());
        let content = std::fs::read_to_string(config_path).with_context(|| {
            format!("failed to read config: {}", config_path.display())
        })?;
        Self::from_toml(&content).with_context(|| {
            format!("failed to parse config: {}", config_path.display())
        })
    }

    /// Parses the configuration from TOML text.
    #[inline]
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Lets the environment override the endpoint settings.
    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        if let Some(model) = &credentials.openai_model {
            self.llm.model = Some(model.clone());
        }
        if let Some(base_url) = &credentials.openai_base_url {
            self.llm.base_url = Some(base_url.clone());
        }
    }

    /// Checks every value and returns all problems found.
    pub fn validate(&self, credentials: &Credentials) -> Vec<String> {
        let mut errors = vec![];

        if credentials.openai_api_key.is_none() {
            errors.push("OPENAI_API_KEY is required".to_owned());
        }
        if self.tools.search.enabled && credentials.tavily_api_key.is_none() {
            errors.push(
                "TAVILY_API_KEY is required when the search tool is enabled"
                    .to_owned(),
            );
        }

        let llm = &self.llm;
        if !(0.0..=1.0).contains(&llm.temperature) {
            errors.push(format!(
                "llm.temperature must be between 0 and 1, got {}",
                llm.temperature
            ));
        }
        if !(llm.top_p > 0.0 && llm.top_p <= 1.0) {
            errors.push(format!(
                "llm.top_p must be in (0, 1], got {}",
                llm.top_p
            ));
        }
        if llm.max_tokens == 0 {
            errors.push("llm.max_tokens must be at least 1".to_owned());
        }
        if self.agent.max_steps == 0 {
            errors.push("agent.max_steps must be at least 1".to_owned());
        }
        if self.agent.default_thread.trim().is_empty() {
            errors.push("agent.default_thread must not be empty".to_owned());
        }
        if !(1..=20).contains(&self.search.max_results) {
            errors.push(format!(
                "search.max_results must be between 1 and 20, got {}",
                self.search.max_results
            ));
        }
        if self.file_operations.max_file_size < 1024 {
            errors.push(
                "file_operations.max_file_size must be at least 1KB".to_owned(),
            );
        }
        if self.security.max_execution_time_ms == 0 {
            errors.push(
                "security.max_execution_time_ms must be at least 1".to_owned(),
            );
        }
        if self.security.rate_limit_per_minute == 0 {
            errors.push(
                "security.rate_limit_per_minute must be at least 1".to_owned(),
            );
        }
        if parse_utc_offset(&self.tools.time.utc_offset).is_none() {
            errors.push(format!(
                "tools.time.utc_offset `{}` is not a valid offset like +08:00",
                self.tools.time.utc_offset
            ));
        }

        errors
    }

    /// Builds the loop configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_steps: self.agent.max_steps,
            retry: RetryPolicy {
                max_retries: self.agent.max_retries,
                ..Default::default()
            },
            sampling: SamplingOptions {
                temperature: Some(self.llm.temperature),
                top_p: Some(self.llm.top_p),
                max_tokens: Some(self.llm.max_tokens),
            },
        }
    }

    /// The guards every tool runs under.
    pub fn base_policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            max_execution_time: Duration::from_millis(
                self.security.max_execution_time_ms,
            ),
            rate_limit: Some(RateLimit::per_minute(
                self.security.rate_limit_per_minute,
            )),
            ..Default::default()
        }
    }

    /// The guards of the file tool: directory lists and the size ceiling
    /// on top of [`AppConfig::base_policy`].
    pub fn file_policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            allowed_dirs: self.security.allowed_directories.clone(),
            blocked_dirs: self.security.blocked_directories.clone(),
            max_payload_size: Some(self.file_operations.max_file_size),
            redact_output: true,
            ..self.base_policy()
        }
    }

    /// Returns the time tool's offset, UTC if it does not parse.
    pub fn utc_offset(&self) -> FixedOffset {
        parse_utc_offset(&self.tools.time.utc_offset).unwrap_or(Utc.fix())
    }
}

/// Builds registration settings from a toggle and the tool's default
/// priority.
pub(crate) fn tool_settings(
    toggle: &ToolToggle,
    default_priority: i32,
    policy: SafetyPolicy,
) -> ToolSettings {
    ToolSettings {
        enabled: toggle.enabled,
        priority: toggle.priority.unwrap_or(default_priority),
        policy,
    }
}

/// Parses `Z`, `UTC`, `+08`, `+0800` or `-05:30`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }
    let (sign, rest) = match s.as_bytes().first().copied()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((hours, minutes)) => (hours, minutes),
        None if rest.len() == 4 => rest.split_at_checked(2)?,
        None => (rest, "0"),
    };
    if hours.is_empty()
        || hours.len() > 2
        || !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
