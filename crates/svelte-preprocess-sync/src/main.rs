//! svelte-preprocess-sync: synchronously preprocess Svelte components.

mod cli;
mod config;
mod orchestrator;
mod output;

use bun_runner::BunPreprocessor;
use clap::Parser;
use cli::Args;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    if args.bun_version {
        return print_bun_version(&args);
    }

    let summary = orchestrator::run(args)?;
    if summary.failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_bun_version(args: &Args) -> Result<()> {
    let workspace = orchestrator::resolve_workspace(&args.workspace);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    let (version, path) = match args.bun_path() {
        Some(path) => runtime
            .block_on(BunPreprocessor::get_bun_version_at(&path))
            .map(|version| (version, path)),
        None => runtime.block_on(BunPreprocessor::get_bun_version(Some(&workspace))),
    }
    .into_diagnostic()?;

    println!("bun {}", version);
    println!("path: {}", path);
    if let Some(cache_dir) = BunPreprocessor::get_cache_dir() {
        println!("cache: {}", cache_dir);
    }
    Ok(())
}
