mod classify;
mod cli;
mod commands;
mod config;
mod error;
mod geometry;
mod model;
mod pipeline;
mod reading_order;
mod source;
mod store;
mod text;
mod util;
mod worker;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{CaseCommands, Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Case(CaseCommands::Create(args)) => commands::case::create(args),
        Commands::Case(CaseCommands::List(args)) => commands::case::list(args),
        Commands::Process(args) => commands::process::run(args),
        Commands::Classify(args) => commands::classify::run(args),
        Commands::Search(args) => commands::search::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
