//! CLI argument definitions for rotor.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rotor_rotation::Category;

/// rotor -- a tool-calling agent that rotates across free-tier models.
#[derive(Debug, Parser)]
#[command(
    name = "rotor",
    version,
    about = "Tool-calling agent with free-tier model rotation",
    long_about = "Answers requests with whichever configured model is currently available, \
                  rotating to another model on rate limits and outages, and executes the \
                  model's tool calls inside a command sandbox."
)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, short, global = true, env = "ROTOR_CONFIG", default_value = "rotor.toml")]
    pub config: PathBuf,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the models serving a category and their status.
    Models {
        /// Only show this category (dialog, code, simple).
        #[arg(long)]
        category: Option<Category>,
    },

    /// Show the current provider and model.
    State,

    /// Point the current state at a specific model.
    Set {
        /// Provider name as declared in the catalogue.
        provider: String,
        /// Model id as declared in the catalogue.
        model: String,
    },

    /// Clear usage counters and any blacklist entry for a model.
    Reset {
        /// Model id as declared in the catalogue.
        model: String,
    },

    /// Send a single request through the agent loop.
    Ask {
        /// Task category used to pick a model.
        #[arg(long, default_value = "dialog")]
        category: Category,

        /// Print error classifier statistics after the answer.
        #[arg(long)]
        stats: bool,

        /// The request text.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}
