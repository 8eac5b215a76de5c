use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use archbot_advisor::{
    ChannelSink, Conversation, DesignError, GatewayError, LlmGateway, ModelGateway, StopReason,
    Validator,
};
use archbot_core::{Architecture, RuleStore, Settings, Violation};

#[derive(Parser, Debug)]
#[command(name = "archbot", about = "Design AWS architectures and check them against your rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an architecture from requirements, then validate and repair it
    Design(DesignArgs),
    /// Check an existing architecture JSON file against the rules, without repair
    Check(CheckArgs),
    /// List the loaded rules
    Rules(ModelArgs),
    /// Save provider, model and API key to ~/.archbot/settings.json
    Configure(ConfigureArgs),
}

#[derive(Args, Debug, Default)]
struct ModelArgs {
    /// LLM provider: openai, anthropic, google, ollama, groq, mistral, deepseek
    #[arg(long)]
    provider: Option<String>,
    /// Model name, e.g. "gpt-4o"
    #[arg(long)]
    model: Option<String>,
    /// Directory of *.md rule files (default: ~/.archbot/rules)
    #[arg(long, value_name = "DIR")]
    rules_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DesignArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// Requirements text; read from --input or stdin when omitted
    #[arg(short, long)]
    requirements: Option<String>,
    /// File containing the requirements
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
    /// Maximum evaluation passes (default from settings, normally 3)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,
    /// Report from an earlier `design` run; the requirements are then treated
    /// as an adjustment of that architecture
    #[arg(short, long, value_name = "FILE")]
    previous: Option<PathBuf>,
    /// Write the JSON report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// Architecture JSON file to check
    #[arg(value_name = "FILE")]
    architecture: PathBuf,
    /// Requirements the architecture was designed for
    #[arg(short, long, default_value = "")]
    requirements: String,
}

#[derive(Args, Debug)]
struct ConfigureArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    model: String,
    #[arg(long, default_value = "")]
    api_key: String,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_iterations: Option<u32>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("AI is not configured: run `archbot configure` or set ARCHBOT_API_KEY")]
    NotConfigured,
    #[error("no requirements given")]
    NoRequirements,
    #[error("max iterations must be at least 1 (check maxIterations in settings)")]
    ZeroIterations,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error(transparent)]
    Core(#[from] archbot_core::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct DesignReport<'a> {
    requirements: &'a str,
    architecture: &'a Architecture,
    violations: &'a [Violation],
    iterations_used: u32,
    stop: String,
}

/// The parts of an earlier design report needed to continue from it.
#[derive(Deserialize)]
struct PreviousDesign {
    #[serde(default)]
    requirements: String,
    #[serde(default)]
    architecture: serde_json::Value,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    all_pass: bool,
    violations: &'a [Violation],
    skipped: &'a [String],
}

fn stop_label(stop: &StopReason) -> String {
    match stop {
        StopReason::NoRules => "no_rules".to_string(),
        StopReason::Passed => "passed".to_string(),
        StopReason::BudgetExhausted => "budget_exhausted".to_string(),
        StopReason::RegenerationFailed(e) => format!("regeneration_failed: {e}"),
    }
}

fn settings_with(args: &ModelArgs) -> Settings {
    let mut settings = archbot_core::read_settings();
    if let Some(p) = &args.provider {
        settings.provider = p.clone();
    }
    if let Some(m) = &args.model {
        settings.model = m.clone();
    }
    if let Some(d) = &args.rules_dir {
        settings.rules_dir = Some(d.clone());
    }
    settings
}

fn build_validator(settings: &Settings) -> Result<Validator, CliError> {
    if !archbot_core::ai_configured(settings) {
        return Err(CliError::NotConfigured);
    }
    let gateway: Arc<dyn ModelGateway> = Arc::new(LlmGateway::new(settings.clone())?);
    let rules = Arc::new(RuleStore::load_dir(&settings.rules_path()));
    Ok(Validator::new(gateway, rules))
}

fn read_requirements(args: &DesignArgs) -> Result<String, CliError> {
    let text = match (&args.requirements, &args.input) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if text.trim().is_empty() {
        return Err(CliError::NoRequirements);
    }
    Ok(text)
}

fn load_previous(path: &Path) -> Result<PreviousDesign, CliError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Build the conversation for this run and the requirements the rules are
/// checked against.
fn start_conversation(previous: Option<PreviousDesign>, input: &str) -> (Conversation, String) {
    let mut conversation = Conversation::new();
    let requirements = match previous {
        Some(prev) => {
            let requirements = if prev.requirements.trim().is_empty() {
                input.to_string()
            } else {
                format!("{}\n\nFollow-up: {input}", prev.requirements)
            };
            conversation.record(prev.requirements, Architecture::from_value(prev.architecture));
            requirements
        }
        None => input.to_string(),
    };
    (conversation, requirements)
}

async fn design(args: DesignArgs) -> Result<(), CliError> {
    let settings = settings_with(&args.model);
    let max_iterations = args.max_iterations.unwrap_or(settings.max_iterations);
    if max_iterations == 0 {
        return Err(CliError::ZeroIterations);
    }
    let input = read_requirements(&args)?;
    let previous = args.previous.as_deref().map(load_previous).transpose()?;
    let validator = build_validator(&settings)?;

    let (conversation, requirements) = start_conversation(previous, &input);
    let request = conversation.next_request(&input);
    tracing::info!(kind = ?request.kind, max_iterations, "starting design");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            eprintln!("{line}");
        }
    });
    let sink = ChannelSink(tx);

    let result = validator
        .design(&request, &requirements, max_iterations, Some(&sink))
        .await;
    drop(sink);
    let _ = printer.await;
    let outcome = result?;

    if !outcome.violations.is_empty() {
        tracing::warn!(
            remaining = outcome.violations.len(),
            "architecture still violates rules"
        );
    }

    let report = DesignReport {
        requirements: &requirements,
        architecture: &outcome.architecture,
        violations: &outcome.violations,
        iterations_used: outcome.iterations_used,
        stop: stop_label(&outcome.stop),
    };
    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json)?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn check(args: CheckArgs) -> Result<(), CliError> {
    let settings = settings_with(&args.model);
    let validator = build_validator(&settings)?;
    let raw = std::fs::read_to_string(&args.architecture)?;
    let architecture = Architecture::from_value(serde_json::from_str(&raw)?);

    let evaluation = validator
        .evaluate_architecture(&architecture, &args.requirements)
        .await;
    let report = CheckReport {
        all_pass: evaluation.all_pass(),
        violations: &evaluation.violations,
        skipped: &evaluation.skipped,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_rules(args: ModelArgs) {
    let settings = settings_with(&args);
    let store = RuleStore::load_dir(&settings.rules_path());
    if store.is_empty() {
        println!("No rules in {}", settings.rules_path().display());
        return;
    }
    for rule in store.iter() {
        match &rule.source {
            Some(path) => println!("{}\t{}", rule.name, path.display()),
            None => println!("{}", rule.name),
        }
    }
}

fn configure(args: ConfigureArgs) -> Result<(), CliError> {
    let mut settings = archbot_core::read_settings();
    settings.provider = args.provider;
    settings.model = args.model;
    if !args.api_key.is_empty() {
        settings.api_key = args.api_key;
    }
    if let Some(n) = args.max_iterations {
        settings.max_iterations = n;
    }
    archbot_core::write_settings(&settings)?;
    println!(
        "Saved settings for {} ({}), configured: {}",
        settings.provider,
        settings.model,
        archbot_core::ai_configured(&settings)
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Design(args) => design(args).await,
        Command::Check(args) => check(args).await,
        Command::Rules(args) => {
            list_rules(args);
            Ok(())
        }
        Command::Configure(args) => configure(args),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
