use std::future::ready;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use steward_core::tool::{Error as ToolError, Tool, ToolOutput};

use crate::config::parse_utc_offset;

/// A source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct GetTimeParameters {
    #[schemars(
        description = "Optional UTC offset such as `+09:00`. Defaults to the configured local offset."
    )]
    #[serde(default)]
    utc_offset: Option<String>,
}

/// A tool that reports the current date and time.
pub struct GetTimeTool {
    parameter_schema: Value,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl GetTimeTool {
    /// Creates a tool reading `clock` and reporting in `offset`.
    pub fn new(clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        GetTimeTool {
            parameter_schema: schema_for!(GetTimeParameters).to_value(),
            clock,
            offset,
        }
    }
}

impl Tool for GetTimeTool {
    type Input = GetTimeParameters;

    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Returns the current date and time."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn validate(&self, input: &Self::Input) -> Result<(), ToolError> {
        match &input.utc_offset {
            Some(offset) if parse_utc_offset(offset).is_none() => {
                Err(ToolError::invalid_input().with_reason(format!(
                    "`{offset}` is not a UTC offset like +08:00"
                )))
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        let offset = input
            .utc_offset
            .as_deref()
            .and_then(parse_utc_offset)
            .unwrap_or(self.offset);
        let now = self.clock.now().with_timezone(&offset);
        ready(Ok(format!(
            "Current time: {} (UTC{})",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.format("%:z")
        )))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn tool() -> GetTimeTool {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        GetTimeTool::new(
            Arc::new(FixedClock(instant)),
            parse_utc_offset("+08:00").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_configured_offset() {
        let output = tool()
            .execute(GetTimeParameters { utc_offset: None })
            .await
            .unwrap();
        assert_eq!(output, "Current time: 2024-03-02 07:30:00 (UTC+08:00)");
    }

    #[tokio::test]
    async fn test_requested_offset() {
        let tool = tool();
        let input = GetTimeParameters {
            utc_offset: Some("-05:00".to_owned()),
        };
        assert!(tool.validate(&input).is_ok());
        let output = tool.execute(input).await.unwrap();
        assert_eq!(output, "Current time: 2024-03-01 18:30:00 (UTC-05:00)");

        let invalid = GetTimeParameters {
            utc_offset: Some("Mars".to_owned()),
        };
        assert!(tool.validate(&invalid).is_err());
    }
}
