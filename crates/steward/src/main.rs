//! The `steward` terminal assistant.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use steward::command::Command;
use steward::config::{AppConfig, Credentials};
use steward::core::{OutputMode, TurnEvent};
use steward::tools::TavilyBackend;
use steward::{Reply, Session, SessionBuilder};
use steward_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::signal::ctrl_c;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";

/// A terminal assistant with web search, calculator, file, weather, system
/// and time tools.
#[derive(Parser, Debug)]
#[command(name = "steward", version)]
struct Args {
    /// Path to the TOML configuration. Defaults to `steward.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Thread to start on.
    #[arg(long)]
    thread: Option<String>,

    /// Print every step as it happens.
    #[arg(long, overrides_with = "no_stream")]
    stream: bool,

    /// Print only the final answer of each turn.
    #[arg(long, overrides_with = "stream")]
    no_stream: bool,
}

impl Args {
    fn streaming(&self) -> Option<bool> {
        match (self.stream, self.no_stream) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    let credentials = Credentials::from_env();
    config.apply_credentials(&credentials);
    if let Some(streaming) = args.streaming() {
        config.agent.streaming = streaming;
    }
    if let Some(thread) = &args.thread {
        config.agent.default_thread = thread.clone();
    }

    let errors = config.validate(&credentials);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{} {error}", "error:".bright_red().bold());
        }
        bail!("invalid configuration ({} problems)", errors.len());
    }

    let api_key = credentials
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY environment variable is not set")?;
    let mut model_config =
        OpenAIConfigBuilder::with_api_key(api_key).with_model(config.llm.model_name());
    if let Some(base_url) = &config.llm.base_url {
        model_config = model_config.with_base_url(base_url);
    }
    let model_provider = OpenAIProvider::new(model_config.build());

    let mut builder =
        SessionBuilder::with_model_provider(model_provider).with_config(config.clone());
    if config.tools.search.enabled {
        if let Some(tavily_key) = &credentials.tavily_api_key {
            builder = builder.with_search_backend(TavilyBackend::new(
                tavily_key,
                &config.search,
            ));
        }
    }
    let mut session = builder.build().context("failed to start the session")?;

    let thread_id = session.thread_id().to_owned();
    if session
        .switch_thread(thread_id)
        .await
        .context("failed to restore the thread")?
    {
        info!("restored thread {}", session.thread_id());
    }

    println!(
        "{}🤖 Steward is ready on thread {} ({} output). Type /help for commands.",
        BAR_CHAR.bright_cyan(),
        session.thread_id(),
        session.output_mode()
    );

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut stdin = BufReader::new(io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line(&mut stdin).await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Some(Ok(command)) => match session.execute(command).await {
                Ok(Reply::Text(text)) => println!("{text}"),
                Ok(Reply::ClearScreen) => {
                    print!("\x1B[2J\x1B[1;1H");
                }
                Ok(Reply::Exit) => break,
                Err(err) => eprintln!("{} {err}", "error:".bright_red().bold()),
            },
            Some(Err(err)) => eprintln!("{} {err}", "error:".bright_red().bold()),
            None => run_turn(&session, line, &progress_style).await,
        }
    }

    Ok(())
}

/// Runs one turn, printing its events. Ctrl-C drops the event stream,
/// which cancels the turn.
async fn run_turn(session: &Session, input: &str, progress_style: &ProgressStyle) {
    let mut events = session.send(input);
    let progress_bar = (session.output_mode() == OutputMode::Batched).then(|| {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.set_message("🤔 Thinking...");
        progress_bar
    });
    let interrupted = ctrl_c();
    tokio::pin!(interrupted);

    loop {
        let event = select! {
            event = events.next() => event,
            _ = &mut interrupted => {
                if let Some(progress_bar) = &progress_bar {
                    progress_bar.finish_and_clear();
                }
                println!("\n{}⏹️  Cancelled", BAR_CHAR.bright_yellow());
                return;
            }
            _ = sleep(Duration::from_millis(100)), if progress_bar.is_some() => {
                if let Some(progress_bar) = &progress_bar {
                    progress_bar.inc(1);
                }
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = &progress_bar {
            progress_bar.finish_and_clear();
        }
        let Some(event) = event else {
            return;
        };
        print_event(&event);
        if event.is_terminal() {
            return;
        }
    }
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::AssistantStep {
            content,
            tool_calls,
        } => {
            if !content.trim().is_empty() {
                println!("{}🤖 {}", BAR_CHAR.bright_cyan(), content.bright_white());
            }
            for call in tool_calls {
                println!(
                    "{}🔧 {} {}",
                    BAR_CHAR.bright_blue(),
                    call.name.bright_white().bold(),
                    call.arguments.dimmed()
                );
            }
        }
        TurnEvent::ToolResult { tool, result } => {
            let first_line = result.content.lines().next().unwrap_or_default();
            if result.failed() {
                println!(
                    "{}❌ {tool}: {}",
                    BAR_CHAR.bright_red(),
                    first_line.bright_red()
                );
            } else {
                println!("{}✅ {tool}: {}", BAR_CHAR.bright_green(), first_line.dimmed());
            }
        }
        TurnEvent::Final(answer) => {
            println!("{}🤖 {}", BAR_CHAR.bright_cyan(), answer.bright_white());
        }
        TurnEvent::Aborted(err) => {
            println!("{}⚠️  {err}", BAR_CHAR.bright_yellow());
        }
    }
}

async fn read_line(stdin: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    select! {
        line = stdin.next_line() => match line {
            Ok(line) => line,
            Err(err) => {
                error!("error reading input: {}", err);
                None
            }
        },
        _ = ctrl_c() => {
            println!();
            None
        }
    }
}
