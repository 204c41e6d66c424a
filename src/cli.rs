//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use citetrack_core::Provider;

/// Track which sources LLM answers cite.
///
/// Citetrack sends a prompt to several web-grounded model providers, pulls the
/// citations out of each answer, and stores them classified as brand,
/// competitor, or other.
#[derive(Parser, Debug)]
#[command(name = "citetrack")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/citetrack/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a prompt to providers and store the citations in their answers
    Run {
        /// Project whose brand and competitors classify citations
        #[arg(long)]
        project: String,

        /// Prompt text, or "-" to read it from stdin
        #[arg(long)]
        prompt: String,

        /// Provider to query (repeatable; default: every provider with an API key)
        #[arg(long = "provider", value_name = "PROVIDER")]
        providers: Vec<Provider>,
    },

    /// Manage projects and their competitor registry
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Print a response's stored citations as JSON lines
    Citations {
        /// Response id printed by `run`
        response_id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project, or update its brand domain
    Add {
        id: String,

        /// Domain that counts as the brand's own (e.g. acme.com)
        #[arg(long)]
        brand_domain: Option<String>,
    },

    /// Register (or reactivate) a competitor domain
    Competitor {
        project: String,
        id: String,
        domain: String,
    },

    /// Stop classifying citations as this competitor
    DropCompetitor { project: String, id: String },
}
