use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ccp_client::config::{default_config_path, ResolvedConfig};
use ccp_client::env::{EnvLookup, ProcessEnv};
use ccp_client::fetcher::BatchResult;
use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    ccp_client::duration::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "ccp-client")]
#[command(about = "Fetch credentials from a Central Credential Provider using a client certificate")]
#[command(version)]
struct Cli {
    /// Object names to look up.
    #[arg(required = true, value_name = "OBJECT")]
    objects: Vec<String>,

    /// Path to config file.
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Maximum lookups in flight at once.
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Per-lookup timeout (e.g. "30s", "500ms").
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    timeout: Option<Duration>,

    /// Skip the vault health probe before fetching.
    #[arg(long)]
    skip_service_check: bool,

    /// Print results as a JSON object.
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (json_layer, text_layer) = if json {
        (
            Some(fmt::layer().with_writer(std::io::stderr).json()),
            None,
        )
    } else {
        (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn render_json(results: &BatchResult) -> Result<String> {
    let mut object = Map::new();
    for (key, result) in results {
        let value = match result {
            Ok(response) => response
                .expose_content()
                .map_or(Value::Null, |content| Value::String(content.to_string())),
            Err(err) => Value::String(format!("error: {err}")),
        };
        object.insert(key.clone(), value);
    }
    serde_json::to_string_pretty(&Value::Object(object)).context("Failed to render results")
}

fn render_text(results: &BatchResult) -> String {
    let mut out = String::from("{\n");
    for (key, result) in results {
        let value = match result {
            Ok(response) => response.expose_content().unwrap_or("(empty)").to_string(),
            Err(err) => format!("error: {err}"),
        };
        out.push_str(&format!("  {key}: {value}\n"));
    }
    out.push('}');
    out
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file: {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let env: Arc<dyn EnvLookup> = Arc::new(ProcessEnv);
    let mut config = ResolvedConfig::load_or_default(&cli.config, env.as_ref())
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    if cli.timeout.is_some() {
        config.request_timeout = cli.timeout;
    }
    if cli.skip_service_check {
        config.verify_service = false;
    }

    let client = config.client(env)?;

    let started = Instant::now();
    let results = client.fetch_objects(cli.objects.as_slice()).await?;
    let elapsed = started.elapsed();

    if cli.json {
        println!("{}", render_json(&results)?);
    } else {
        println!("{}", render_text(&results));
    }
    println!("Execution time: {:.2} seconds", elapsed.as_secs_f64());

    if results.values().any(|result| result.is_err()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
