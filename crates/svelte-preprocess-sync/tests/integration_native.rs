//! Integration tests for the CLI using the built-in transform chain.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn run(workspace: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_svelte-preprocess-sync"))
        .arg("--workspace")
        .arg(workspace)
        .arg("--backend")
        .arg("native")
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to run svelte-preprocess-sync")
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is a JSON report"))
        .collect()
}

fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

#[test]
fn test_json_reports_per_file() {
    let dir = project(&[
        ("src/App.svelte", "<script lang=\"ts\">let count: number = 0</script>\n<p>{count}</p>"),
        ("src/Plain.svelte", "<p>plain</p>"),
        ("node_modules/lib/Ignored.svelte", "<p>ignored</p>"),
    ]);

    let output = run(dir.path(), &["--output", "json"]);
    assert!(output.status.success());

    let reports = json_lines(&output);
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["filename"], "src/App.svelte");
    assert_eq!(reports[0]["status"], "fresh");
    assert_eq!(
        reports[0]["result"]["instance"],
        json!({
            "original_text": "let count: number = 0",
            "result_text": "let count: number = 0",
            "size_delta": 0,
            "ext": "ts",
        })
    );
    assert_eq!(reports[1]["filename"], "src/Plain.svelte");
    assert_eq!(reports[1]["result"]["code"], "<p>plain</p>");
}

#[test]
fn test_transform_config_from_svelte_config() {
    let dir = project(&[
        (
            "svelte.config.js",
            "export default { preprocess: sveltePreprocess({ replace: [['__NAME__', 'world']] }) };",
        ),
        ("Hello.svelte", "<h1>Hello __NAME__</h1>"),
    ]);

    let output = run(dir.path(), &["--output", "json"]);
    let reports = json_lines(&output);

    assert_eq!(reports[0]["result"]["code"], "<h1>Hello world</h1>");
    assert_eq!(reports[0]["result"]["markup"]["size_delta"], 3);
}

#[test]
fn test_transform_config_flag_overrides_file() {
    let dir = project(&[
        (
            "svelte.config.js",
            "export default { preprocess: sveltePreprocess({ replace: [['__NAME__', 'world']] }) };",
        ),
        ("Hello.svelte", "<h1>Hello __NAME__</h1>"),
    ]);

    let output = run(
        dir.path(),
        &[
            "--output",
            "json",
            "--transform-config",
            r#"{"replace":[["__NAME__","there"]]}"#,
        ],
    );
    let reports = json_lines(&output);

    assert_eq!(reports[0]["result"]["code"], "<h1>Hello there</h1>");
}

#[test]
fn test_syntax_error_reuses_previous_result() {
    let dir = project(&[
        ("a/Good.svelte", "<script lang=\"ts\">let ok = 1</script>"),
        ("b/Broken.svelte", "<script lang=\"ts\">let x = (;</script>"),
    ]);

    let output = run(dir.path(), &["--output", "json"]);
    let reports = json_lines(&output);

    assert_eq!(reports[1]["filename"], "b/Broken.svelte");
    assert_eq!(reports[1]["status"], "stale");
    assert_eq!(reports[1]["reason"], "preprocessing failed");
    assert_eq!(reports[1]["result"], reports[0]["result"]);
}

#[test]
fn test_fail_on_empty() {
    let dir = project(&[("Broken.svelte", "<script lang=\"ts\">let x = (;</script>")]);

    let output = run(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Broken.svelte: empty"));

    let output = run(dir.path(), &["--fail-on-empty"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_explicit_paths_and_summary() {
    let dir = project(&[
        ("src/A.svelte", "<p>a</p>"),
        ("src/B.svelte", "<p>b</p>"),
        ("other/C.svelte", "<p>c</p>"),
    ]);

    let output = run(dir.path(), &["--one-shot", "--wait", "polling", "src"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("src/A.svelte: fresh"));
    assert!(stdout.contains("src/B.svelte: fresh"));
    assert!(!stdout.contains("C.svelte"));
    assert!(stdout.contains("processed 2 files: 2 fresh, 0 stale, 0 empty"));
}

#[test]
fn test_invalid_transform_config_is_fatal() {
    let dir = project(&[("A.svelte", "<p>a</p>")]);

    let output = run(dir.path(), &["--transform-config", "{not json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid transform config"));
}

#[test]
#[serial]
fn test_missing_bun_is_fatal() {
    let dir = project(&[("A.svelte", "<p>a</p>")]);

    let output = Command::new(env!("CARGO_BIN_EXE_svelte-preprocess-sync"))
        .arg("--workspace")
        .arg(dir.path())
        .arg("--bun")
        .arg(dir.path().join("no-such-bun"))
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to run svelte-preprocess-sync");

    assert_eq!(output.status.code(), Some(1));
}
