//! A set of built-in tools that models can use.

mod calculator;
mod datetime;
mod file_ops;
mod search;
mod system_info;
mod weather;

pub use calculator::CalculatorTool;
pub use datetime::{Clock, GetTimeTool, SystemClock};
pub use file_ops::FileOpsTool;
pub use search::{SearchBackend, SearchHit, SearchTool, TavilyBackend};
pub use system_info::{HostProbe, SystemInfoTool, SystemProbe, SystemSnapshot};
pub use weather::{MockWeather, WeatherReport, WeatherSource, WeatherTool};
