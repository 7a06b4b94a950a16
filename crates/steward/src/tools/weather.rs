use std::fmt::{self, Display};
use std::future::ready;
use std::sync::Arc;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use steward_core::tool::{Error as ToolError, Tool, ToolOutput};

/// Current conditions in one city.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeatherReport {
    /// Like `15°C`.
    pub temperature: String,
    /// Like `65%`.
    pub humidity: String,
    /// Like `10km/h`.
    pub wind_speed: String,
    /// Like `Sunny`.
    pub condition: String,
}

/// A source of weather reports.
pub trait WeatherSource: Send + Sync + 'static {
    /// Returns the report for `city`, if the city is known.
    fn lookup(&self, city: &str) -> Option<WeatherReport>;
}

struct MockCity {
    names: &'static [&'static str],
    temperature: &'static str,
    humidity: &'static str,
    wind_speed: &'static str,
    condition: &'static str,
}

const MOCK_CITIES: &[MockCity] = &[
    MockCity {
        names: &["北京", "beijing"],
        temperature: "15°C",
        humidity: "65%",
        wind_speed: "10km/h",
        condition: "Sunny",
    },
    MockCity {
        names: &["上海", "shanghai"],
        temperature: "18°C",
        humidity: "70%",
        wind_speed: "8km/h",
        condition: "Cloudy",
    },
    MockCity {
        names: &["广州", "guangzhou"],
        temperature: "22°C",
        humidity: "80%",
        wind_speed: "12km/h",
        condition: "Overcast",
    },
    MockCity {
        names: &["深圳", "shenzhen"],
        temperature: "24°C",
        humidity: "85%",
        wind_speed: "15km/h",
        condition: "Rainy",
    },
];

/// Fixed reports for a handful of cities, for development.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockWeather;

impl WeatherSource for MockWeather {
    fn lookup(&self, city: &str) -> Option<WeatherReport> {
        let city = city.trim().to_lowercase();
        MOCK_CITIES
            .iter()
            .find(|entry| entry.names.contains(&city.as_str()))
            .map(|entry| WeatherReport {
                temperature: entry.temperature.to_owned(),
                humidity: entry.humidity.to_owned(),
                wind_speed: entry.wind_speed.to_owned(),
                condition: entry.condition.to_owned(),
            })
    }
}

impl Display for WeatherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Temperature: {}", self.temperature)?;
        writeln!(f, "Humidity: {}", self.humidity)?;
        writeln!(f, "Wind speed: {}", self.wind_speed)?;
        write!(f, "Condition: {}", self.condition)
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct WeatherParameters {
    #[schemars(description = "Name of the city, e.g. `Beijing`.")]
    city: String,
}

/// A tool that reports the weather of a city.
pub struct WeatherTool {
    parameter_schema: Value,
    source: Arc<dyn WeatherSource>,
}

impl WeatherTool {
    /// Creates a tool backed by `source`.
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        WeatherTool {
            parameter_schema: schema_for!(WeatherParameters).to_value(),
            source,
        }
    }
}

impl Tool for WeatherTool {
    type Input = WeatherParameters;

    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Returns the current weather of a city."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn validate(&self, input: &Self::Input) -> Result<(), ToolError> {
        if input.city.trim().is_empty() {
            return Err(ToolError::invalid_input().with_reason("`city` is empty"));
        }
        Ok(())
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        let city = input.city.trim();
        let report = self.source.lookup(city).unwrap_or_else(|| WeatherReport {
            temperature: "unknown".to_owned(),
            humidity: "unknown".to_owned(),
            wind_speed: "unknown".to_owned(),
            condition: "no data available".to_owned(),
        });
        ready(Ok(format!("Weather in {city}:\n{report}")))
    }
}
