//! CLI argument parsing.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use preprocess_bridge::{BridgeConfig, Lifecycle, WaitConfig};
use std::time::Duration;

/// Synchronously preprocess Svelte components through an async preprocessing worker.
#[derive(Debug, Parser)]
#[command(name = "svelte-preprocess-sync")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Files or directories to preprocess (defaults to the workspace)
    pub paths: Vec<Utf8PathBuf>,

    /// Working directory; svelte.config.js and node_modules are resolved from here
    #[arg(long, default_value = ".")]
    pub workspace: Utf8PathBuf,

    /// Preprocessing backend
    #[arg(long, value_enum, default_value = "bun")]
    pub backend: Backend,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// How to wait for the worker
    #[arg(long, value_enum, default_value = "blocking")]
    pub wait: WaitMode,

    /// Give up waiting for a result after this many milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Start a fresh worker for every file
    #[arg(long = "one-shot")]
    pub one_shot: bool,

    /// Transform config (JSON), overrides the one found in svelte.config.js
    #[arg(long = "transform-config")]
    pub transform_config: Option<String>,

    /// Glob patterns to ignore
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Watch mode
    #[arg(long)]
    pub watch: bool,

    /// Preserve watch output (don't clear screen)
    #[arg(long = "preserveWatchOutput")]
    pub preserve_watch_output: bool,

    /// Path to the bun binary (`~` and env vars are expanded)
    #[arg(long)]
    pub bun: Option<String>,

    /// Show bun version and installation path
    #[arg(long = "bun-version")]
    pub bun_version: bool,

    /// Exit with error when a file produces no result
    #[arg(long = "fail-on-empty")]
    pub fail_on_empty: bool,
}

/// Preprocessing backend.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum Backend {
    /// svelte-preprocess running in bun (default)
    #[default]
    Bun,
    /// Built-in transform chain
    Native,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// JSON output, one object per file
    Json,
}

/// Wait strategy.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum WaitMode {
    /// Block on the completion signal (default)
    #[default]
    Blocking,
    /// Poll fast, then slow
    Polling,
}

impl Args {
    /// Returns the wait configuration selected by `--wait` and `--timeout-ms`.
    pub fn wait_config(&self) -> WaitConfig {
        let timeout = self.timeout_ms.map(Duration::from_millis);
        match (self.wait, timeout) {
            (WaitMode::Blocking, Some(timeout)) => WaitConfig::blocking(timeout),
            (WaitMode::Blocking, None) => WaitConfig::default(),
            (WaitMode::Polling, Some(timeout)) => WaitConfig::polling_within(timeout),
            (WaitMode::Polling, None) => WaitConfig::polling(),
        }
    }

    /// Returns the bridge configuration for these arguments.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            wait: self.wait_config(),
            lifecycle: if self.one_shot {
                Lifecycle::OneShot
            } else {
                Lifecycle::Persistent
            },
            ..BridgeConfig::default()
        }
    }

    /// Returns the bun path with `~` and environment variables expanded.
    pub fn bun_path(&self) -> Option<Utf8PathBuf> {
        let raw = self.bun.as_deref()?;
        let expanded = shellexpand::full(raw)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        Some(Utf8PathBuf::from(expanded))
    }
}
