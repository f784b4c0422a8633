//! Main orchestration logic.

use crate::cli::{Args, Backend};
use crate::config::SvelteConfig;
use crate::output::{FileReport, Formatter, RunSummary};
use bun_runner::{BunError, BunPreprocessor};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use miette::Diagnostic;
use preprocess_bridge::{Bridge, BridgeError, Preprocessor};
use preprocess_chain::ChainPreprocessor;
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Orchestration errors.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    /// Invalid glob pattern.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    /// `--transform-config` is not valid JSON.
    #[error("invalid transform config")]
    #[diagnostic(help("pass a JSON object, e.g. --transform-config '{{\"typescript\":true}}'"))]
    InvalidTransformConfig(#[source] serde_json::Error),

    /// Watch error.
    #[error("watch error: {0}")]
    WatchFailed(String),

    /// The bun backend could not be set up.
    #[error(transparent)]
    #[diagnostic(help("install bun, pass --bun <path>, or use --backend native"))]
    Bun(#[from] BunError),

    /// The worker could not be started.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Runs the preprocessor on all files.
pub fn run(args: Args) -> Result<RunSummary, OrchestratorError> {
    let workspace = resolve_workspace(&args.workspace);

    let svelte_config = SvelteConfig::load(&workspace);
    let transform_config = match &args.transform_config {
        Some(raw) => serde_json::from_str(raw).map_err(OrchestratorError::InvalidTransformConfig)?,
        None => svelte_config.preprocess.clone().unwrap_or(Value::Null),
    };

    let ignore_set = build_ignore_set(&args.ignore)?;
    let extensions = svelte_config.file_extensions();
    let roots: Vec<Utf8PathBuf> = if args.paths.is_empty() {
        vec![workspace.clone()]
    } else {
        args.paths.iter().map(|p| workspace.join(p)).collect()
    };
    let files = collect_files(&workspace, &roots, &extensions, &ignore_set);
    tracing::debug!(count = files.len(), workspace = %workspace, "Collected files");

    let preprocessor = build_preprocessor(&args, &workspace)?;
    let mut bridge = Bridge::new(preprocessor, args.bridge_config(), transform_config);

    let formatter = Formatter::new(args.output);
    let mut summary = RunSummary {
        fail_on_empty: args.fail_on_empty,
        ..RunSummary::default()
    };

    if args.watch {
        run_watch_mode(
            &args,
            &workspace,
            &mut bridge,
            &formatter,
            files,
            &extensions,
            &ignore_set,
        )?;
    } else {
        for file in &files {
            preprocess_file(&mut bridge, &formatter, &workspace, file, &mut summary)?;
        }
        if let Some(line) = formatter.format_summary(&summary) {
            println!("{}", line);
        }
    }

    Ok(summary)
}

/// Resolves the workspace against the current directory.
pub fn resolve_workspace(workspace: &Utf8Path) -> Utf8PathBuf {
    if workspace.is_relative() {
        std::env::current_dir()
            .ok()
            .and_then(|p| Utf8PathBuf::try_from(p).ok())
            .unwrap_or_default()
            .join(workspace)
    } else {
        workspace.to_path_buf()
    }
}

fn build_preprocessor(
    args: &Args,
    workspace: &Utf8Path,
) -> Result<Arc<dyn Preprocessor>, OrchestratorError> {
    match args.backend {
        Backend::Native => Ok(Arc::new(ChainPreprocessor::standard())),
        Backend::Bun => {
            let bun_path = args
                .bun_path()
                .or_else(|| BunPreprocessor::find_bun(Some(workspace)))
                .ok_or(BunError::NotFound)?;
            tracing::debug!(bun = %bun_path, "Using bun backend");
            Ok(Arc::new(BunPreprocessor::new(bun_path, workspace.to_path_buf())?))
        }
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, OrchestratorError> {
    let mut ignore_builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| OrchestratorError::InvalidGlob(e.to_string()))?;
        ignore_builder.add(glob);
    }

    for pattern in ["**/node_modules/**", "**/dist/**", "**/.svelte-kit/**"] {
        if let Ok(glob) = Glob::new(pattern) {
            ignore_builder.add(glob);
        }
    }

    ignore_builder
        .build()
        .map_err(|e| OrchestratorError::InvalidGlob(e.to_string()))
}

/// Finds component files under `roots`, in a stable order.
fn collect_files(
    workspace: &Utf8Path,
    roots: &[Utf8PathBuf],
    extensions: &[&str],
    ignore_set: &GlobSet,
) -> Vec<Utf8PathBuf> {
    let mut files: Vec<Utf8PathBuf> = roots
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| Utf8PathBuf::try_from(e.into_path()).ok())
        })
        .filter(|p| is_component(workspace, p, extensions, ignore_set))
        .collect();
    files.sort();
    files.dedup();
    files
}

fn is_component(
    workspace: &Utf8Path,
    path: &Utf8Path,
    extensions: &[&str],
    ignore_set: &GlobSet,
) -> bool {
    let file_name = path.file_name().unwrap_or("");
    if !extensions.iter().any(|ext| file_name.ends_with(ext)) {
        return false;
    }
    let relative = path.strip_prefix(workspace).unwrap_or(path);
    !ignore_set.is_match(relative.as_str())
}

fn preprocess_file(
    bridge: &mut Bridge,
    formatter: &Formatter,
    workspace: &Utf8Path,
    path: &Utf8Path,
    summary: &mut RunSummary,
) -> Result<(), OrchestratorError> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(path = %path, "Failed to read file: {e}");
            return Ok(());
        }
    };

    let relative = path.strip_prefix(workspace).unwrap_or(path);
    let resolution = bridge.preprocess(&source, relative.as_str())?;
    if let Some(reason) = resolution.fallback_reason() {
        tracing::warn!(path = %relative, %reason, "Preprocessing did not produce a fresh result");
    }

    let report = FileReport::new(relative, resolution);
    summary.record(&report);
    print!("{}", formatter.format(&report));
    Ok(())
}

fn run_watch_mode(
    args: &Args,
    workspace: &Utf8Path,
    bridge: &mut Bridge,
    formatter: &Formatter,
    initial_files: Vec<Utf8PathBuf>,
    extensions: &[&str],
    ignore_set: &GlobSet,
) -> Result<(), OrchestratorError> {
    use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::sync::mpsc;
    use std::time::Duration;

    println!("Starting watch mode...\n");

    let mut summary = RunSummary::default();
    for file in &initial_files {
        preprocess_file(bridge, formatter, workspace, file, &mut summary)?;
    }

    let (tx, rx) = mpsc::channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(1)),
    )
    .map_err(|e| OrchestratorError::WatchFailed(e.to_string()))?;

    watcher
        .watch(workspace.as_std_path(), RecursiveMode::Recursive)
        .map_err(|e| OrchestratorError::WatchFailed(e.to_string()))?;

    println!("Watching for changes... (Ctrl+C to stop)\n");

    for event in rx {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        let mut changed: Vec<Utf8PathBuf> = event
            .paths
            .into_iter()
            .filter_map(|p| Utf8PathBuf::try_from(p).ok())
            .filter(|p| p.is_file() && is_component(workspace, p, extensions, ignore_set))
            .collect();
        changed.dedup();
        if changed.is_empty() {
            continue;
        }

        if !args.preserve_watch_output {
            // Clear screen
            print!("\x1B[2J\x1B[1;1H");
        }

        let mut summary = RunSummary::default();
        for file in &changed {
            preprocess_file(bridge, formatter, workspace, file, &mut summary)?;
        }
    }

    Err(OrchestratorError::WatchFailed(
        "watch channel closed unexpectedly".to_string(),
    ))
}
