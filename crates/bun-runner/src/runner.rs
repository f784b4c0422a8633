//! bun process runner.

use blake3::Hasher;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use preprocess_bridge::{
    BoxFuture, PreprocessError, Preprocessor, Processed, Request, ScriptCapture, SubResult,
    SyntaxTree, TransformResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const BUN_SCRIPT_FILENAME: &str = "bun-svelte-preprocess.mjs";
const BUN_SCRIPT_SOURCE: &str = r#"import { createInterface } from 'node:readline';
import { stdin, stdout } from 'node:process';
import { createRequire } from 'node:module';
import { pathToFileURL } from 'node:url';

const require = createRequire(pathToFileURL(process.cwd() + '/'));
const load = async (name) => import(pathToFileURL(require.resolve(name)).href);
const fail = (what, err) => {
  const message = err && err.message ? err.message : String(err);
  console.error(`svelte-preprocess-sync bun runner failed to load ${what}: ${message}`);
  process.exit(2);
};

let preprocess = null;
let autoPreprocess = null;
let parseTypescript = null;

try {
  preprocess = (await load('svelte/compiler')).preprocess;
} catch (err) {
  fail('svelte/compiler', err);
}

try {
  const mod = await load('svelte-preprocess');
  autoPreprocess = mod.sveltePreprocess || mod.default;
} catch (err) {
  fail('svelte-preprocess', err);
}

try {
  const estree = await load('@typescript-eslint/typescript-estree');
  parseTypescript = (content) => estree.parse(content, { loc: true });
} catch {
  parseTypescript = null;
}

const write = (value) =>
  stdout.write(JSON.stringify(value, (_, v) => (typeof v === 'bigint' ? v.toString() : v)) + '\n');
const log = (id, message) => write({ id, log: message });

const isTypescript = (attributes) =>
  attributes.lang === 'ts' || attributes.lang === 'typescript' || attributes.type === 'text/typescript';

const finish = (capture, content) => {
  if (capture) {
    capture.result_text = content;
    capture.size_delta = capture.original_text.length - content.length;
  }
};

async function run(id, source, filename, config) {
  let markup;
  let module;
  let instance;
  let style;

  const before = {
    markup: ({ content }) => {
      markup = { original_text: content };
      return { code: content };
    },
    script: ({ content, attributes }) => {
      if (isTypescript(attributes)) {
        const capture = { original_text: content, ext: 'ts' };
        if (parseTypescript) {
          capture.parsed_syntax_tree = parseTypescript(content);
        }
        if (attributes.context) {
          module = capture;
        } else {
          instance = capture;
        }
      }
      return { code: content };
    },
    style: ({ content }) => {
      style = { original_text: content };
      return { code: content };
    }
  };

  const after = {
    markup: ({ content }) => {
      finish(markup, content);
      return { code: content };
    },
    script: ({ content, attributes }) => {
      finish(attributes.context ? module : instance, content);
      return { code: content };
    },
    style: ({ content }) => {
      finish(style, content);
      return { code: content };
    }
  };

  log(id, 'starting preprocess');
  const result = await preprocess(source, [before, autoPreprocess(config || {}), after], {
    filename: filename || 'unknown'
  });
  log(id, 'finished preprocess');

  return {
    code: result.code,
    dependencies: (result.dependencies || []).map(String),
    module,
    instance,
    markup,
    style
  };
}

write({ ready: true });

const rl = createInterface({ input: stdin, crlfDelay: Infinity });

for await (const line of rl) {
  if (!line.trim()) continue;

  let req;
  try {
    req = JSON.parse(line);
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    write({ id: null, error: `invalid json: ${message}` });
    continue;
  }

  try {
    const result = await run(req.id, req.source, req.filename, req.config);
    write({ id: req.id, result });
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    write({ id: req.id, error: message });
  }
}
"#;

/// Error types for bun runner.
#[derive(Debug, Error)]
pub enum BunError {
    /// Failed to spawn bun process.
    #[error("failed to spawn bun: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// bun process exited with error.
    #[error("bun exited with code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    /// bun binary not found.
    #[error("bun binary not found - install bun or pass its path explicitly")]
    NotFound,

    /// Failed to prepare the runner script.
    #[error("failed to prepare bun runner script: {0}")]
    ScriptFailed(String),

    /// bun runner protocol error.
    #[error("bun runner protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse bun response.
    #[error("failed to parse bun response: {0}")]
    ParseError(String),

    /// The preprocessor chain threw inside bun.
    #[error("svelte preprocess failed: {0}")]
    Preprocess(String),
}

impl From<BunError> for PreprocessError {
    fn from(err: BunError) -> Self {
        match err {
            BunError::Preprocess(message) => PreprocessError::Step(message),
            BunError::ProtocolError(_) | BunError::ParseError(_) => {
                PreprocessError::Protocol(err.to_string())
            }
            _ => PreprocessError::Backend(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct BunRequest<'a> {
    id: u64,
    filename: &'a str,
    source: &'a str,
    config: &'a Value,
}

#[derive(Debug, Deserialize)]
struct BunResponse {
    id: Option<u64>,
    result: Option<TransformResult>,
    error: Option<String>,
    log: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BunReady {
    ready: bool,
}

/// Runs `svelte/compiler`'s `preprocess` with `svelte-preprocess` in a
/// persistent bun process.
///
/// The process is started by [`Preprocessor::warm_up`] and restarted on the
/// next request if it dies. The request's transform config is passed to
/// `sveltePreprocess` as its options.
pub struct BunPreprocessor {
    bun_path: Utf8PathBuf,
    workspace_root: Utf8PathBuf,
    script_path: Utf8PathBuf,
    process: Mutex<Option<BunProcess>>,
    next_id: AtomicU64,
}

impl BunPreprocessor {
    /// Creates a preprocessor that runs `bun_path` inside `workspace_root`,
    /// where `svelte` and `svelte-preprocess` are resolved from.
    pub fn new(bun_path: Utf8PathBuf, workspace_root: Utf8PathBuf) -> Result<Self, BunError> {
        let script_path = ensure_script()?;
        Ok(Self {
            bun_path,
            workspace_root,
            script_path,
            process: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Attempts to find bun in workspace, PATH, home directory, or cache.
    /// 1. Workspace node_modules/.bin/bun (if workspace_root provided)
    /// 2. PATH
    /// 3. ~/.bun/bin/bun (default install location)
    /// 4. Cache directory
    pub fn find_bun(workspace_root: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
        if let Some(workspace) = workspace_root {
            if let Some(path) = find_bun_in_bin(&workspace.join("node_modules/.bin")) {
                return Some(path);
            }
        }

        if let Ok(path) = which::which("bun") {
            if let Ok(utf8_path) = Utf8PathBuf::try_from(path) {
                return Some(utf8_path);
            }
        }

        if let Some(home) = dirs::home_dir().and_then(|p| Utf8PathBuf::try_from(p).ok()) {
            if let Some(path) = find_bun_in_bin(&home.join(".bun/bin")) {
                return Some(path);
            }
        }

        Self::get_cache_dir().and_then(|cache_dir| find_bun_in_bin(&cache_dir.join("node_modules/.bin")))
    }

    /// Gets the cache directory for svelte-preprocess-sync.
    pub fn get_cache_dir() -> Option<Utf8PathBuf> {
        dirs::cache_dir()
            .and_then(|p| Utf8PathBuf::try_from(p).ok())
            .map(|p| p.join("svelte-preprocess-sync"))
    }

    /// Gets the version of the bun binary that would be used.
    pub async fn get_bun_version(
        workspace_root: Option<&Utf8Path>,
    ) -> Result<(String, Utf8PathBuf), BunError> {
        let bun_path = Self::find_bun(workspace_root).ok_or(BunError::NotFound)?;
        let version = Self::get_bun_version_at(&bun_path).await?;
        Ok((version, bun_path))
    }

    /// Gets the version of the bun binary at `bun_path`.
    pub async fn get_bun_version_at(bun_path: &Utf8Path) -> Result<String, BunError> {
        let output = Command::new(bun_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(BunError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BunError::ProcessFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn bun_path(&self) -> &Utf8Path {
        &self.bun_path
    }

    async fn spawn_process(&self) -> Result<BunProcess, BunError> {
        BunProcess::spawn(&self.bun_path, &self.workspace_root, &self.script_path).await
    }
}

impl std::fmt::Debug for BunPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BunPreprocessor")
            .field("bun_path", &self.bun_path)
            .field("workspace_root", &self.workspace_root)
            .field("script_path", &self.script_path)
            .finish_non_exhaustive()
    }
}

impl Preprocessor for BunPreprocessor {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), PreprocessError>> {
        Box::pin(async move {
            let mut process = self.process.lock().await;
            if process.is_none() {
                *process = Some(self.spawn_process().await?);
            }
            Ok(())
        })
    }

    fn preprocess<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Processed, PreprocessError>> {
        Box::pin(async move {
            let mut guard = self.process.lock().await;
            let process = match guard.as_mut() {
                Some(process) => process,
                None => {
                    tracing::debug!(bun = %self.bun_path, "Restarting bun runner");
                    guard.insert(self.spawn_process().await?)
                }
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match process.preprocess(id, request).await {
                Ok(result) => Ok(into_processed(result)),
                Err(err @ BunError::Preprocess(_)) => Err(err.into()),
                Err(err) => {
                    // The process is in an unknown state; start over next time.
                    *guard = None;
                    Err(err.into())
                }
            }
        })
    }
}

/// Turns bun's answer back into a worker-side result.
fn into_processed(result: TransformResult) -> Processed {
    fn script(mut block: SubResult) -> ScriptCapture {
        let syntax = block.parsed_syntax_tree.take().map(SyntaxTree::Json);
        ScriptCapture { block, syntax }
    }

    Processed {
        code: result.code,
        dependencies: result.dependencies,
        module: result.module.map(script),
        instance: result.instance.map(script),
        markup: result.markup,
        style: result.style,
    }
}

fn find_bun_in_bin(bin: &Utf8Path) -> Option<Utf8PathBuf> {
    let candidates: &[&str] = if cfg!(windows) {
        &["bun.exe", "bun.cmd", "bun"]
    } else {
        &["bun"]
    };

    candidates
        .iter()
        .map(|candidate| bin.join(candidate))
        .find(|path| path.exists())
}

/// Writes the runner script into the cache directory unless an identical
/// copy is already there.
fn ensure_script() -> Result<Utf8PathBuf, BunError> {
    let cache_dir = BunPreprocessor::get_cache_dir()
        .ok_or_else(|| BunError::ScriptFailed("could not determine cache directory".into()))?;
    write_script(&cache_dir)
}

fn write_script(cache_dir: &Utf8Path) -> Result<Utf8PathBuf, BunError> {
    fs::create_dir_all(cache_dir)
        .map_err(|e| BunError::ScriptFailed(format!("failed to create cache dir: {e}")))?;

    // Several lint processes may start at once; only one writes.
    let lock_path = cache_dir.join(format!("{BUN_SCRIPT_FILENAME}.lock"));
    let lock = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| BunError::ScriptFailed(format!("failed to open {lock_path}: {e}")))?;
    lock.lock_exclusive()
        .map_err(|e| BunError::ScriptFailed(format!("failed to lock {lock_path}: {e}")))?;

    let script_path = cache_dir.join(BUN_SCRIPT_FILENAME);
    let mut hasher = Hasher::new();
    hasher.update(BUN_SCRIPT_SOURCE.as_bytes());
    let expected_hash = hasher.finalize();

    if let Ok(existing) = fs::read(&script_path) {
        let mut hasher = Hasher::new();
        hasher.update(&existing);
        if hasher.finalize() == expected_hash {
            return Ok(script_path);
        }
    }

    tracing::debug!(path = %script_path, "Writing bun runner script");
    fs::write(&script_path, BUN_SCRIPT_SOURCE)
        .map_err(|e| BunError::ScriptFailed(format!("failed to write bun runner script: {e}")))?;

    Ok(script_path)
}

struct BunProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
}

impl BunProcess {
    async fn spawn(
        bun_path: &Utf8Path,
        workspace_root: &Utf8Path,
        script_path: &Utf8Path,
    ) -> Result<Self, BunError> {
        let mut child = Command::new(bun_path)
            .arg(script_path)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BunError::SpawnFailed)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BunError::ProtocolError("failed to open bun stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BunError::ProtocolError("failed to open bun stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BunError::ProtocolError("failed to open bun stderr".to_string()))?;

        let stderr_task = tokio::spawn(forward_stderr(stderr));

        let mut stdout_reader = BufReader::new(stdout).lines();

        let ready_line = stdout_reader
            .next_line()
            .await
            .map_err(|e| BunError::ProtocolError(format!("failed to read bun ready: {e}")))?;

        let Some(ready_line) = ready_line else {
            let stderr = stderr_task.await.unwrap_or_default();
            let status = child.wait().await.map_err(BunError::SpawnFailed)?;
            return Err(BunError::ProcessFailed {
                code: status.code().unwrap_or(-1),
                stderr,
            });
        };

        let ready: BunReady = serde_json::from_str(&ready_line)
            .map_err(|e| BunError::ParseError(format!("invalid ready response: {e}")))?;
        if !ready.ready {
            return Err(BunError::ProtocolError(format!(
                "unexpected bun ready response: {}",
                ready_line
            )));
        }

        tracing::debug!(bun = %bun_path, workspace = %workspace_root, "bun runner ready");

        Ok(Self {
            child,
            stdin,
            stdout: stdout_reader,
            stderr_task: Some(stderr_task),
        })
    }

    async fn preprocess(&mut self, id: u64, request: &Request) -> Result<TransformResult, BunError> {
        let line = serde_json::to_string(&BunRequest {
            id,
            filename: &request.filename,
            source: &request.source,
            config: &request.config,
        })
        .map_err(|e| BunError::ProtocolError(format!("failed to serialize request: {e}")))?;

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BunError::ProtocolError(format!("failed to write to bun stdin: {e}")))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| BunError::ProtocolError(format!("failed to write newline: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| BunError::ProtocolError(format!("failed to flush bun stdin: {e}")))?;

        loop {
            let line = self.stdout.next_line().await.map_err(|e| {
                BunError::ProtocolError(format!("failed to read bun response: {e}"))
            })?;

            let Some(line) = line else {
                return Err(self.exit_error().await);
            };

            match parse_response(&line, id)? {
                Reply::Log(message) => tracing::debug!(id, "bun: {message}"),
                Reply::Other(other) => {
                    tracing::warn!(expected = id, got = ?other, "Ignoring response for another request");
                }
                Reply::Done(result) => return result,
            }
        }
    }

    async fn exit_error(&mut self) -> BunError {
        let stderr = match self.stderr_task.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        match self.child.wait().await {
            Ok(status) => BunError::ProcessFailed {
                code: status.code().unwrap_or(-1),
                stderr,
            },
            Err(e) => BunError::SpawnFailed(e),
        }
    }
}

/// The last lines bun wrote to stderr, kept for [`BunError::ProcessFailed`].
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    const MAX_LINES: usize = 50;

    fn push(&mut self, line: String) {
        if self.lines.len() == Self::MAX_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

/// Logs each stderr line as it arrives and returns the tail once bun exits.
async fn forward_stderr<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = StderrTail::default();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::warn!("bun: {line}");
                tail.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading bun stderr: {e}");
                break;
            }
        }
    }
    tail.into_string()
}

/// One parsed line from the runner.
#[derive(Debug)]
enum Reply {
    Log(String),
    Other(Option<u64>),
    Done(Result<TransformResult, BunError>),
}

fn parse_response(line: &str, id: u64) -> Result<Reply, BunError> {
    let response: BunResponse = serde_json::from_str(line)
        .map_err(|e| BunError::ParseError(format!("invalid response: {e} ({line})")))?;

    if let Some(message) = response.log {
        return Ok(Reply::Log(message));
    }

    match (response.id, response.error) {
        (None, Some(error)) => Err(BunError::ProtocolError(error)),
        (Some(got), _) if got != id => Ok(Reply::Other(Some(got))),
        (None, None) => Ok(Reply::Other(None)),
        (Some(_), Some(error)) => Ok(Reply::Done(Err(BunError::Preprocess(error)))),
        (Some(_), None) => Ok(Reply::Done(response.result.ok_or_else(|| {
            BunError::ProtocolError(format!("response {id} has neither result nor error"))
        }))),
    }
}
