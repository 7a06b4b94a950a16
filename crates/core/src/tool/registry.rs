use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::Arc;

use serde_json::Value;
use steward_model::{ModelTool, ToolCallRequest};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::object::{ToolObject, ToolObjectImpl};
use super::rate_limit::RateLimiter;
use super::{Error, Redactor, SafetyPolicy, Tool, ToolOutput, ToolResult};
use crate::error::RegistryError;

/// Per-tool registration settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSettings {
    /// Disabled tools are neither advertised nor dispatched.
    pub enabled: bool,
    /// Lower values are advertised first.
    pub priority: i32,
    /// Guards enforced around each call.
    pub policy: SafetyPolicy,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            policy: SafetyPolicy::default(),
        }
    }
}

/// A registered tool, as listed by [`ToolRegistry::describe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSummary {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Whether the tool is enabled.
    pub enabled: bool,
    /// Advertising priority.
    pub priority: i32,
}

struct Entry {
    tool: Arc<dyn ToolObject>,
    settings: ToolSettings,
    rate_limiter: Option<RateLimiter>,
}

/// An object that owns the toolset and handles requests from the model.
///
/// Registration happens once at startup. Afterwards the registry is
/// shared immutably, only the rate limit counters change.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    redactor: Redactor,
}

impl ToolRegistry {
    /// Creates an empty registry that redacts with the current user's
    /// home directory.
    #[inline]
    pub fn new() -> Self {
        Self::with_redactor(Redactor::from_env())
    }

    /// Creates an empty registry with the given redactor.
    #[inline]
    pub fn with_redactor(redactor: Redactor) -> Self {
        Self {
            entries: HashMap::new(),
            redactor,
        }
    }

    /// Registers a tool.
    pub fn register<T: Tool>(
        &mut self,
        tool: T,
        settings: ToolSettings,
    ) -> Result<(), RegistryError> {
        let name = tool.name().to_owned();
        check_schema(&name, tool.parameter_schema())?;
        let MapEntry::Vacant(slot) = self.entries.entry(name) else {
            return Err(RegistryError::DuplicateTool(tool.name().to_owned()));
        };
        debug!(
            "registered tool `{}` (enabled: {}, priority: {})",
            slot.key(),
            settings.enabled,
            settings.priority
        );
        slot.insert(Entry {
            tool: Arc::new(ToolObjectImpl(tool)),
            rate_limiter: settings.policy.rate_limit.map(RateLimiter::new),
            settings,
        });
        Ok(())
    }

    /// Returns the definitions of enabled tools, ordered by priority and
    /// then by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut enabled: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.settings.enabled)
            .collect();
        enabled.sort_by(|a, b| {
            (a.settings.priority, a.tool.name())
                .cmp(&(b.settings.priority, b.tool.name()))
        });
        enabled
            .into_iter()
            .map(|entry| ModelTool {
                name: entry.tool.name().to_owned(),
                description: entry.tool.description().to_owned(),
                parameters: entry.tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Lists every registered tool, including disabled ones, sorted by
    /// name.
    pub fn describe(&self) -> Vec<ToolSummary> {
        let mut summaries: Vec<_> = self
            .entries
            .values()
            .map(|entry| ToolSummary {
                name: entry.tool.name().to_owned(),
                description: entry.tool.description().to_owned(),
                enabled: entry.settings.enabled,
                priority: entry.settings.priority,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Returns `true` if an enabled tool has this name.
    #[inline]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.settings.enabled)
    }

    /// Runs one tool call. Never fails: every error becomes a failed
    /// [`ToolResult`].
    ///
    /// # Cancel safety
    ///
    /// Dropping the future aborts the running handler task.
    pub async fn dispatch(&self, req: &ToolCallRequest) -> ToolResult {
        let span = debug_span!("tool dispatch", tool = %req.name, id = %req.id);
        async move {
            let Some(entry) = self
                .entries
                .get(&req.name)
                .filter(|entry| entry.settings.enabled)
            else {
                warn!("tool not found: {}", req.name);
                let err = Error::unknown_tool()
                    .with_reason(format!("no tool named `{}`", req.name));
                return ToolResult::failure(&req.id, &err);
            };

            trace!("running with args: {:?}", req.arguments);
            match self.run(entry, req.arguments.clone()).await {
                Ok(output) => {
                    let output = if entry.settings.policy.redact_output {
                        self.redactor.redact(&output).into_owned()
                    } else {
                        output
                    };
                    ToolResult::success(&req.id, output)
                }
                Err(err) => {
                    debug!("tool call failed: {err}");
                    ToolResult::failure(&req.id, &err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, entry: &Entry, arguments: Value) -> ToolOutput {
        let policy = &entry.settings.policy;
        let prepared = Arc::clone(&entry.tool).prepare(arguments)?;

        policy.check_paths(&prepared.access.paths)?;
        if let Some(len) = prepared.access.payload_len {
            policy.check_payload(len)?;
        }
        if let Some(limiter) = &entry.rate_limiter {
            if !limiter.try_acquire() {
                return Err(Error::rate_limited().with_reason(format!(
                    "`{}` was called too often, try again later",
                    entry.tool.name()
                )));
            }
        }

        let mut task =
            AbortOnDrop(tokio::spawn(async move { prepared.run().await }));
        let output = match tokio::time::timeout(
            policy.max_execution_time,
            &mut task.0,
        )
        .await
        {
            Ok(Ok(output)) => output?,
            Ok(Err(err)) if err.is_panic() => {
                let reason = panic_message(err.into_panic());
                error!("tool `{}` panicked: {reason}", entry.tool.name());
                return Err(Error::execution_error()
                    .with_reason(format!("the tool crashed: {reason}")));
            }
            Ok(Err(_)) => {
                return Err(Error::execution_error()
                    .with_reason("the tool task was cancelled"));
            }
            Err(_) => {
                return Err(Error::timeout().with_reason(format!(
                    "no result within {} ms",
                    policy.max_execution_time.as_millis()
                )));
            }
        };

        policy.check_payload(output.len() as u64)?;
        Ok(output)
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    #[inline]
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn check_schema(tool: &str, schema: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        tool: tool.to_owned(),
        reason: reason.to_owned(),
    };
    let Some(object) = schema.as_object() else {
        return Err(invalid("the schema must be a JSON object"));
    };
    match object.get("type") {
        Some(Value::String(ty)) if ty == "object" => Ok(()),
        _ => Err(invalid(r#"the schema must declare "type": "object""#)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::future::{pending, ready};
    use std::path::PathBuf;
    use std::sync::LazyLock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::{Access, ErrorKind, RateLimit};

    static OBJECT_SCHEMA: LazyLock<Value> =
        LazyLock::new(|| json!({ "type": "object" }));

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    struct EchoTool {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl EchoTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: Default::default(),
            }
        }
    }

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echoes the text back"
        }

        fn parameter_schema(&self) -> &Value {
            &OBJECT_SCHEMA
        }

        fn validate(&self, input: &Self::Input) -> Result<(), Error> {
            if input.text.is_empty() {
                return Err(Error::invalid_input().with_reason("empty text"));
            }
            Ok(())
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolOutput> + Send + 'static {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(input.text))
        }
    }

    #[derive(Deserialize)]
    struct WriteInput {
        path: PathBuf,
        content: String,
    }

    struct WriteTool {
        calls: Arc<AtomicUsize>,
    }

    impl Tool for WriteTool {
        type Input = WriteInput;

        fn name(&self) -> &str {
            "write"
        }

        fn description(&self) -> &str {
            "Pretends to write a file"
        }

        fn parameter_schema(&self) -> &Value {
            &OBJECT_SCHEMA
        }

        fn access(&self, input: &Self::Input) -> Access {
            Access::none()
                .with_path(&input.path)
                .with_payload_len(input.content.len() as u64)
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolOutput> + Send + 'static {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ready(Ok(format!("wrote {} bytes", input.content.len())))
        }
    }

    struct StuckTool;

    impl Tool for StuckTool {
        type Input = Value;

        fn name(&self) -> &str {
            "stuck"
        }

        fn description(&self) -> &str {
            "Never finishes"
        }

        fn parameter_schema(&self) -> &Value {
            &OBJECT_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolOutput> + Send + 'static {
            pending()
        }
    }

    struct PanicTool;

    impl Tool for PanicTool {
        type Input = Value;

        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Panics with the given message"
        }

        fn parameter_schema(&self) -> &Value {
            &OBJECT_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolOutput> + Send + 'static {
            async move {
                match input.get("message") {
                    Some(message) => panic!("{message}"),
                    None => Ok(String::new()),
                }
            }
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_register_errors() {
        let mut registry = ToolRegistry::with_redactor(Redactor::default());
        registry
            .register(EchoTool::new("echo"), ToolSettings::default())
            .unwrap();
        assert_eq!(
            registry.register(EchoTool::new("echo"), ToolSettings::default()),
            Err(RegistryError::DuplicateTool("echo".to_owned()))
        );

        assert!(check_schema("x", &json!({ "type": "object" })).is_ok());
        assert!(matches!(
            check_schema("x", &json!({ "type": "string" })),
            Err(RegistryError::InvalidSchema { .. })
        ));
        assert!(check_schema("x", &Value::Null).is_err());
    }

    #[test]
    fn test_definitions_order() {
        let mut registry = ToolRegistry::with_redactor(Redactor::default());
        for (name, priority, enabled) in [
            ("b", 1, true),
            ("a", 1, true),
            ("z", 0, true),
            ("hidden", -5, false),
        ] {
            let settings = ToolSettings {
                enabled,
                priority,
                ..Default::default()
            };
            registry.register(EchoTool::new(name), settings).unwrap();
        }
        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, ["z", "a", "b"]);
        assert_eq!(registry.describe().len(), 4);
        assert!(!registry.is_enabled("hidden"));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let mut registry = ToolRegistry::with_redactor(Redactor::default());
        let disabled = EchoTool::new("disabled");
        let disabled_calls = Arc::clone(&disabled.calls);
        registry
            .register(
                disabled,
                ToolSettings {
                    enabled: false,
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .register(EchoTool::new("echo"), ToolSettings::default())
            .unwrap();

        let result = registry.dispatch(&call("missing", json!({}))).await;
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownTool));
        assert_eq!(result.call_id, "call_missing");

        let result = registry
            .dispatch(&call("disabled", json!({ "text": "hi" })))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownTool));
        assert_eq!(disabled_calls.load(Ordering::SeqCst), 0);

        for arguments in [
            json!({ "txt": "typo" }),
            json!({ "text": "" }),
            Value::String("{not json".to_owned()),
        ] {
            let result = registry.dispatch(&call("echo", arguments)).await;
            assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));
        }

        let result = registry
            .dispatch(&call("echo", json!({ "text": "hello" })))
            .await;
        assert_eq!(result, ToolResult::success("call_echo", "hello"));
    }

    #[tokio::test]
    async fn test_path_and_size_checks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::with_redactor(Redactor::default());
        registry
            .register(
                WriteTool {
                    calls: Arc::clone(&calls),
                },
                ToolSettings {
                    policy: SafetyPolicy {
                        allowed_dirs: vec!["/srv/data".into()],
                        blocked_dirs: vec!["/etc".into()],
                        max_payload_size: Some(8),
                        rate_limit: Some(RateLimit::per_minute(1)),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        let result = registry
            .dispatch(&call(
                "write",
                json!({ "path": "/etc/passwd", "content": "x" }),
            ))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::AccessDenied));

        let result = registry
            .dispatch(&call(
                "write",
                json!({ "path": "/srv/data/a", "content": "too long!" }),
            ))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::PayloadTooLarge));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Rejected calls did not consume the single allowed call.
        let result = registry
            .dispatch(&call("write", json!({ "path": "/srv/data/a", "content": "ok" })))
            .await;
        assert!(!result.failed());
        let result = registry
            .dispatch(&call("write", json!({ "path": "/srv/data/a", "content": "ok" })))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_panic() {
        let mut registry = ToolRegistry::with_redactor(Redactor::default());
        registry
            .register(
                StuckTool,
                ToolSettings {
                    policy: SafetyPolicy {
                        max_execution_time: Duration::from_secs(5),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        registry.register(PanicTool, ToolSettings::default()).unwrap();

        let result = registry.dispatch(&call("stuck", json!({}))).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));

        let result = registry
            .dispatch(&call("panic", json!({ "message": "boom" })))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
        assert!(result.content.contains("boom"));
    }

    #[tokio::test]
    async fn test_output_limit_and_redaction() {
        let mut registry =
            ToolRegistry::with_redactor(Redactor::with_home("/home/alice"));
        registry
            .register(
                EchoTool::new("echo"),
                ToolSettings {
                    policy: SafetyPolicy {
                        max_payload_size: Some(64),
                        redact_output: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        let result = registry
            .dispatch(&call(
                "echo",
                json!({ "text": "/home/alice/notes with sk-0123456789abcdef" }),
            ))
            .await;
        assert_eq!(result.content, "~/notes with [REDACTED]");

        let result = registry
            .dispatch(&call("echo", json!({ "text": "x".repeat(65) })))
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::PayloadTooLarge));
    }
}
