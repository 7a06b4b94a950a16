use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_core::tool::{Error as ToolError, Tool, ToolOutput};

use crate::config::{SearchConfig, SearchDepth};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_SNIPPET_CHARS: usize = 500;

/// One search result.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    /// Page title.
    pub title: String,
    /// Page address.
    pub url: String,
    /// Relevant excerpt of the page.
    #[serde(default)]
    pub content: String,
}

/// A web search provider.
pub trait SearchBackend: Send + Sync + 'static {
    /// Searches the web. The returned future must not borrow `self`.
    fn search(
        &self,
        query: String,
        max_results: u32,
    ) -> impl Future<Output = Result<Vec<SearchHit>, ToolError>> + Send + 'static;
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Searches with the Tavily API.
#[derive(Clone)]
pub struct TavilyBackend {
    client: Client,
    api_key: String,
    endpoint: String,
    search_depth: SearchDepth,
    timeout: Duration,
}

impl TavilyBackend {
    /// Creates a backend authenticating with `api_key`.
    pub fn new<S: Into<String>>(api_key: S, config: &SearchConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: TAVILY_ENDPOINT.to_owned(),
            search_depth: config.search_depth,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Sends requests to another endpoint, e.g. a proxy.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl SearchBackend for TavilyBackend {
    fn search(
        &self,
        query: String,
        max_results: u32,
    ) -> impl Future<Output = Result<Vec<SearchHit>, ToolError>> + Send + 'static
    {
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&TavilyRequest {
                query: &query,
                max_results,
                search_depth: self.search_depth.as_str(),
            });
        async move {
            let resp = request.send().await.map_err(|err| {
                let reason = if err.is_timeout() {
                    "the search provider did not answer in time".to_owned()
                } else {
                    format!("failed to reach the search provider: {err}")
                };
                ToolError::execution_error().with_reason(reason)
            })?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!("search failed with status {status}: {body}");
                return Err(ToolError::execution_error()
                    .with_reason(format!("the search provider returned {status}")));
            }
            let resp: TavilyResponse = resp.json().await.map_err(|err| {
                ToolError::execution_error()
                    .with_reason(format!("unexpected search response: {err}"))
            })?;
            Ok(resp.results)
        }
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct SearchParameters {
    #[schemars(description = "What to search for.")]
    query: String,
}

/// A tool that searches the web for recent information.
pub struct SearchTool<B> {
    parameter_schema: Value,
    backend: B,
    max_results: u32,
}

impl<B: SearchBackend> SearchTool<B> {
    /// Creates a tool backed by `backend`.
    pub fn new(backend: B, max_results: u32) -> Self {
        SearchTool {
            parameter_schema: schema_for!(SearchParameters).to_value(),
            backend,
            max_results,
        }
    }
}

impl<B: SearchBackend> Tool for SearchTool<B> {
    type Input = SearchParameters;

    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Searches the web for up-to-date information and news."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn validate(&self, input: &Self::Input) -> Result<(), ToolError> {
        if input.query.trim().is_empty() {
            return Err(ToolError::invalid_input().with_reason("`query` is empty"));
        }
        Ok(())
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        let search = self
            .backend
            .search(input.query.trim().to_owned(), self.max_results);
        async move {
            let hits = search.await?;
            Ok(render(&input.query, &hits))
        }
    }
}

fn render(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for \"{}\".", query.trim());
    }
    let mut output = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        if idx > 0 {
            output.push('\n');
        }
        _ = writeln!(output, "{}. {}", idx + 1, hit.title);
        _ = writeln!(output, "   {}", hit.url);
        let snippet = hit.content.trim();
        if !snippet.is_empty() {
            let mut snippet: String = snippet.chars().take(MAX_SNIPPET_CHARS).collect();
            if snippet.len() < hit.content.trim().len() {
                snippet.push('…');
            }
            _ = writeln!(output, "   {snippet}");
        }
    }
    output.truncate(output.trim_end().len());
    output
}
