//! CLI entry point for rotor.
//!
//! This binary provides the `rotor` command: inspecting and steering model
//! rotation, and sending one-shot requests through the agent loop.

mod cli;
mod config;
mod helpers;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rotor_agent::{AgentError, ErrorStatistics};
use rotor_rotation::{Category, ModelStatus, RotationManager};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use crate::config::RotorConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    helpers::init_tracing(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AgentError>() {
                Some(agent_err) => eprintln!("error[{}]: {err:#}", agent_err.code()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = RotorConfig::load(&cli.config)?;
    let rotation = helpers::rotation_manager(&config, &cli.config)?;

    match cli.command {
        Commands::Models { category } => cmd_models(&rotation, category),
        Commands::State => cmd_state(&rotation),
        Commands::Set { provider, model } => cmd_set(&rotation, &provider, &model),
        Commands::Reset { model } => cmd_reset(&rotation, &model),
        Commands::Ask {
            category,
            stats,
            message,
        } => cmd_ask(&config, rotation, category, stats, &message.join(" ")).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands: rotation
// ---------------------------------------------------------------------------

fn cmd_models(rotation: &RotationManager, category: Option<Category>) -> Result<()> {
    let categories = match category {
        Some(c) => vec![c],
        None => Category::ALL.to_vec(),
    };
    let current = rotation.current_state();

    for category in categories {
        println!("{category}:");
        let models = rotation.list_models(category);
        if models.is_empty() {
            println!("  (none)");
        }
        for model in models {
            let marker = if model.id == current.model_id { "*" } else { " " };
            let status = rotation
                .status(&model.id)
                .map(|s| s.to_string())
                .unwrap_or_else(|| ModelStatus::Inactive.to_string());
            let tier = if model.is_free { "free" } else { "paid" };
            println!(
                " {marker} {:<36} {:<12} {:<5} {status}",
                model.id, model.provider, tier
            );
        }
    }
    Ok(())
}

fn cmd_state(rotation: &RotationManager) -> Result<()> {
    let state = rotation.current_state();
    println!("provider: {}", state.provider);
    println!("model:    {}", state.model_id);
    if let Some(usage) = rotation.usage(&state.model_id) {
        println!("calls:    {} ({} failed)", usage.calls, usage.failures);
        if let Some(at) = usage.last_used_at {
            println!("last use: {}", at.to_rfc3339());
        }
    }
    if let Some(until) = rotation.blacklisted_until(&state.model_id) {
        println!("blacklisted until {}", until.to_rfc3339());
    }
    Ok(())
}

fn cmd_set(rotation: &RotationManager, provider: &str, model: &str) -> Result<()> {
    let state = rotation.set_state(provider, model)?;
    println!("current model set to {} ({})", state.model_id, state.provider);
    Ok(())
}

fn cmd_reset(rotation: &RotationManager, model: &str) -> Result<()> {
    rotation.reset_usage(model)?;
    println!("usage and blacklist cleared for {model}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: ask
// ---------------------------------------------------------------------------

async fn cmd_ask(
    config: &RotorConfig,
    rotation: RotationManager,
    category: Category,
    stats: bool,
    message: &str,
) -> Result<()> {
    let agent = helpers::build_agent(config, Arc::new(rotation))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let result = agent.ask(message, category, &cancel).await;
    cancel.cancel();

    if stats {
        print_statistics(&agent.classifier().statistics());
    }

    let response = result.context("request failed")?;
    println!("{}", response.text);
    if response.truncated {
        eprintln!(
            "(stopped after {} tool turns; raise agent.max_tool_turns to allow more)",
            response.tool_turns
        );
    }
    tracing::info!(
        model = %response.model_id,
        attempts = response.attempts,
        tool_turns = response.tool_turns,
        "request completed"
    );
    Ok(())
}

fn print_statistics(stats: &ErrorStatistics) {
    eprintln!("errors: {}", stats.total_errors);
    for (kind, count) in &stats.by_kind {
        eprintln!("  {kind}: {count}");
    }
    for (model, count) in &stats.by_model {
        eprintln!("  {model}: {count}");
    }
    eprintln!("successful retries: {}", stats.successful_retries);
}
