//! CLI entry point for citetrack.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use citetrack_core::provider::build_adapter;
use citetrack_core::{
    CitationPipeline, CitationStore, Database, OutcomeStatus, Provider, RetryingCaller,
    SqliteCitationStore,
};
use tracing::{debug, info, warn};

mod cli;
mod config;

use cli::{Args, Command, ProjectCommand};
use config::{FileConfig, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "ignoring unreadable .env"),
    }

    let loaded = load_config(args.config.as_deref())?;
    debug!(
        path = ?loaded.path,
        from_file = loaded.loaded_from_file,
        "configuration resolved"
    );
    let config = loaded.config;

    match args.command {
        Command::Run {
            project,
            prompt,
            providers,
        } => run_batch(&config, &project, &prompt, providers).await,
        Command::Project { command } => manage_project(&config, command).await,
        Command::Citations { response_id } => print_citations(&config, response_id).await,
    }
}

async fn open_store(config: &FileConfig) -> Result<SqliteCitationStore> {
    let path = config.database_path();
    let db = Database::new(&path)
        .await
        .with_context(|| format!("Failed to open database '{}'", path.display()))?;
    Ok(SqliteCitationStore::new(db))
}

async fn run_batch(
    config: &FileConfig,
    project: &str,
    prompt: &str,
    providers: Vec<Provider>,
) -> Result<()> {
    let prompt = read_prompt(prompt)?;

    let explicit = !providers.is_empty();
    let requested = if explicit {
        providers
    } else {
        Provider::ALL.to_vec()
    };

    let caller = RetryingCaller::new(Arc::new(config.rate_limiter()))
        .with_max_retries(config.max_retries());
    let store = Arc::new(open_store(config).await?);
    let mut pipeline = CitationPipeline::new(Arc::new(caller), store);

    let mut runnable = Vec::with_capacity(requested.len());
    for provider in requested {
        let call_config = match config.provider_call_config(provider) {
            Ok(call_config) => call_config,
            Err(e) if explicit => {
                // Still run it so the failure lands in the report and the database.
                warn!(%provider, error = %e, "provider has no usable configuration");
                runnable.push(provider);
                continue;
            }
            Err(e) => {
                debug!(%provider, error = %e, "skipping provider without API key");
                continue;
            }
        };
        let settings = config.provider_settings(provider);
        let adapter = build_adapter(provider, settings.base_url.as_deref(), config.timeouts())?;
        pipeline = pipeline.with_provider(adapter, call_config);
        runnable.push(provider);
    }

    if runnable.is_empty() {
        bail!(
            "No provider has an API key configured\n  Suggestion: set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY or PERPLEXITY_API_KEY (a .env file works)"
        );
    }

    info!(project, providers = runnable.len(), "running prompt");
    let report = pipeline.run(project, &prompt, &runnable).await?;

    for outcome in &report.outcomes {
        let response = outcome
            .response_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        match &outcome.status {
            OutcomeStatus::Succeeded { citations } => {
                println!("{}\tok\tresponse={response}\tcitations={citations}", outcome.provider);
            }
            OutcomeStatus::Failed { error } => {
                let error = error.lines().next().unwrap_or_default();
                println!("{}\tfailed\tresponse={response}\t{error}", outcome.provider);
            }
        }
    }
    Ok(())
}

fn read_prompt(prompt: &str) -> Result<String> {
    let prompt = if prompt == "-" {
        if io::stdin().is_terminal() {
            bail!("--prompt - expects the prompt on stdin");
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        prompt.to_string()
    };

    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("Prompt is empty");
    }
    Ok(prompt.to_string())
}

async fn manage_project(config: &FileConfig, command: ProjectCommand) -> Result<()> {
    let store = open_store(config).await?;
    match command {
        ProjectCommand::Add { id, brand_domain } => {
            store.upsert_project(&id, brand_domain.as_deref()).await?;
            println!("project {id} saved");
        }
        ProjectCommand::Competitor {
            project,
            id,
            domain,
        } => {
            store.add_competitor(&project, &id, &domain).await?;
            println!("competitor {id} registered for {project}");
        }
        ProjectCommand::DropCompetitor { project, id } => {
            if !store.deactivate_competitor(&project, &id).await? {
                bail!("Competitor '{id}' is not registered for project '{project}'");
            }
            println!("competitor {id} deactivated for {project}");
        }
    }
    Ok(())
}

async fn print_citations(config: &FileConfig, response_id: i64) -> Result<()> {
    let store = open_store(config).await?;
    let citations = store.citations_for_response(response_id).await?;
    if citations.is_empty() {
        info!(response_id, "no citations stored for response");
    }
    for citation in &citations {
        println!("{}", serde_json::to_string(citation)?);
    }
    Ok(())
}
