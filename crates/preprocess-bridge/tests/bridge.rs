//! End-to-end tests for the synchronous bridge.
//!
//! A scripted preprocessor stands in for the real pipeline. Directives in
//! the source control it:
//! - `<!-- slow:N -->` sleeps N milliseconds before answering
//! - `<!-- fail -->` returns an error
//! - `<!-- panic -->` panics inside the preprocessor

use preprocess_bridge::{
    BoxFuture, Bridge, BridgeConfig, BridgeError, FallbackReason, Lifecycle, PollPhase,
    PollingWait, PreprocessError, Preprocessor, Processed, Request, Resolution, ScriptCapture,
    SubResult, SyntaxTree, TransformResult, WaitConfig,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TS_SOURCE: &str = "<script lang=\"ts\">let x=1</script>";

#[derive(Default)]
struct Scripted {
    warm_ups: AtomicUsize,
    calls: AtomicUsize,
    fail_warm_up: bool,
}

impl Scripted {
    fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn directive(source: &str, name: &str) -> Option<u64> {
    let start = source.find(&format!("<!-- {name}:"))? + name.len() + 6;
    let end = source[start..].find(" -->")? + start;
    source[start..end].parse().ok()
}

fn transpile(source: &str) -> Processed {
    const OPEN: &str = "<script lang=\"ts\">";
    const CLOSE: &str = "</script>";

    let Some(start) = source.find(OPEN) else {
        return Processed {
            code: source.to_string(),
            ..Processed::default()
        };
    };
    let content_start = start + OPEN.len();
    let content_end = source[content_start..]
        .find(CLOSE)
        .map(|i| i + content_start)
        .unwrap_or(source.len());
    let original = &source[content_start..content_end];

    let mut output = original.replace("let ", "var ");
    if !output.ends_with(';') {
        output.push(';');
    }

    let mut instance = ScriptCapture::new(
        original,
        "ts",
        Some(SyntaxTree::Live(Box::new(original.to_string()))),
    );
    instance.block.finish(output.clone());

    let tail = (content_end + CLOSE.len()).min(source.len());
    Processed {
        code: format!(
            "{}<script>{}</script>{}",
            &source[..start],
            output,
            &source[tail..]
        ),
        instance: Some(instance),
        ..Processed::default()
    }
}

impl Preprocessor for Scripted {
    fn warm_up(&self) -> BoxFuture<'_, Result<(), PreprocessError>> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_warm_up;
        Box::pin(async move {
            if fail {
                Err(PreprocessError::Backend("compiler not installed".into()))
            } else {
                Ok(())
            }
        })
    }

    fn preprocess<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Processed, PreprocessError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = directive(&request.source, "slow") {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if request.source.contains("<!-- fail -->") {
                return Err(PreprocessError::Step("script step rejected input".into()));
            }
            if request.source.contains("<!-- panic -->") {
                panic!("worker crashed");
            }
            Ok(transpile(&request.source))
        })
    }
}

fn expected_ts_result() -> TransformResult {
    TransformResult {
        code: "<script>var x=1;</script>".into(),
        dependencies: vec![],
        module: None,
        instance: Some(SubResult {
            original_text: "let x=1".into(),
            result_text: Some("var x=1;".into()),
            size_delta: Some(-1),
            ext: Some("ts".into()),
            parsed_syntax_tree: None,
        }),
        markup: None,
        style: None,
    }
}

fn bridge_with(preprocessor: Arc<Scripted>, wait: WaitConfig) -> Bridge {
    let config = BridgeConfig {
        wait,
        ..BridgeConfig::default()
    };
    Bridge::new(preprocessor, config, Value::Null)
}

#[test]
fn test_fresh_result_matches_worker_output() {
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::default());

    let resolution = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();

    assert_eq!(resolution, Resolution::Fresh(expected_ts_result()));
    assert_eq!(bridge.last_known_good(), Some(&expected_ts_result()));
}

#[test]
fn test_fresh_result_with_polling_wait() {
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::polling());

    let resolution = bridge
        .preprocess(&format!("<!-- slow:30 -->{TS_SOURCE}"), "Counter.svelte")
        .unwrap();

    let result = resolution.into_result().unwrap();
    assert_eq!(result.code, "<!-- slow:30 --><script>var x=1;</script>");
    assert_eq!(result.instance, expected_ts_result().instance);
}

#[test]
fn test_worker_failure_without_history_is_empty() {
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::default());

    let resolution = bridge.preprocess("<!-- fail -->", "Broken.svelte").unwrap();

    assert_eq!(resolution, Resolution::Empty(FallbackReason::WorkerFailed));
}

#[test]
fn test_worker_failure_returns_last_known_good() {
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::default());
    bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();

    let resolution = bridge.preprocess("<!-- fail -->", "Broken.svelte").unwrap();

    assert_eq!(
        resolution,
        Resolution::Stale {
            result: expected_ts_result(),
            reason: FallbackReason::WorkerFailed,
        }
    );

    // The worker keeps serving after a failure.
    let resolution = bridge.preprocess("<p>ok</p>", "Ok.svelte").unwrap();
    assert!(resolution.is_fresh());
}

#[test]
fn test_timeout_returns_previous_result_unchanged() {
    let mut bridge = bridge_with(
        Scripted::shared(),
        WaitConfig::blocking(Duration::from_millis(100)),
    );
    bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();

    let start = Instant::now();
    let resolution = bridge
        .preprocess("<!-- slow:1000 --><p>late</p>", "Slow.svelte")
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(900));
    assert_eq!(
        resolution,
        Resolution::Stale {
            result: expected_ts_result(),
            reason: FallbackReason::TimedOut,
        }
    );
}

#[test]
fn test_polling_timeout_is_equivalent_to_failure() {
    let polling = PollingWait {
        fast: PollPhase::from_millis(5, 20),
        slow: PollPhase::from_millis(20, 40),
    };
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::default())
        .with_wait_strategy(Box::new(polling));

    let timed_out = bridge
        .preprocess("<!-- slow:500 --><p/>", "Slow.svelte")
        .unwrap();
    assert_eq!(timed_out, Resolution::Empty(FallbackReason::TimedOut));
    assert_eq!(timed_out.into_result(), None);
}

#[test]
fn test_late_response_is_not_mistaken_for_next_call() {
    let mut bridge = bridge_with(
        Scripted::shared(),
        WaitConfig::blocking(Duration::from_millis(150)),
    );

    let first = bridge
        .preprocess("<!-- slow:200 --><p>first</p>", "First.svelte")
        .unwrap();
    assert_eq!(first, Resolution::Empty(FallbackReason::TimedOut));

    // The first job completes while this call waits; its signal must be
    // ignored and this call must see its own result.
    let second = bridge.preprocess("<p>second</p>", "Second.svelte").unwrap();
    assert_eq!(second.into_result().unwrap().code, "<p>second</p>");
}

#[test]
fn test_identical_calls_are_idempotent() {
    let mut bridge = bridge_with(Scripted::shared(), WaitConfig::default());

    let first = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();
    let second = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();

    assert!(first.is_fresh());
    assert_eq!(first, second);
}

#[test]
fn test_warm_up_failure_is_fatal() {
    let preprocessor = Arc::new(Scripted {
        fail_warm_up: true,
        ..Scripted::default()
    });
    let mut bridge = bridge_with(preprocessor, WaitConfig::default());

    let err = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap_err();

    assert!(matches!(err, BridgeError::WarmUp(_)));
    assert!(err.to_string().contains("compiler not installed"));
}

#[test]
fn test_one_shot_lifecycle_respawns_worker() {
    let preprocessor = Scripted::shared();
    let config = BridgeConfig {
        lifecycle: Lifecycle::OneShot,
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::new(preprocessor.clone(), config, Value::Null);

    assert!(bridge.preprocess(TS_SOURCE, "A.svelte").unwrap().is_fresh());
    assert!(!bridge.has_worker());
    assert!(bridge.preprocess(TS_SOURCE, "B.svelte").unwrap().is_fresh());

    assert_eq!(preprocessor.warm_ups.load(Ordering::SeqCst), 2);
    assert_eq!(preprocessor.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_persistent_lifecycle_reuses_worker() {
    let preprocessor = Scripted::shared();
    let mut bridge = bridge_with(preprocessor.clone(), WaitConfig::default());

    for _ in 0..3 {
        bridge.preprocess(TS_SOURCE, "A.svelte").unwrap();
    }

    assert!(bridge.has_worker());
    assert_eq!(preprocessor.warm_ups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_preprocessor_fails_fast() {
    let preprocessor = Scripted::shared();
    let mut bridge = bridge_with(preprocessor.clone(), WaitConfig::default());

    let start = Instant::now();
    let crashed = bridge.preprocess("<!-- panic -->", "Crash.svelte").unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(crashed, Resolution::Empty(FallbackReason::WorkerFailed));
    assert!(bridge.has_worker());

    let recovered = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();
    assert_eq!(recovered, Resolution::Fresh(expected_ts_result()));

    let crashed = bridge.preprocess("<!-- panic -->", "Crash.svelte").unwrap();
    assert_eq!(
        crashed,
        Resolution::Stale {
            result: expected_ts_result(),
            reason: FallbackReason::WorkerFailed,
        }
    );
    assert_eq!(preprocessor.warm_ups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_superseded_requests_are_skipped() {
    let preprocessor = Scripted::shared();
    let mut bridge = bridge_with(
        preprocessor.clone(),
        WaitConfig::blocking(Duration::from_millis(200)),
    );

    // Keeps the worker busy while the next two requests queue up behind it.
    let first = bridge
        .preprocess("<!-- slow:500 --><p>one</p>", "One.svelte")
        .unwrap();
    let second = bridge.preprocess("<p>two</p>", "Two.svelte").unwrap();
    let third = bridge.preprocess("<p>three</p>", "Three.svelte").unwrap();

    assert_eq!(first, Resolution::Empty(FallbackReason::TimedOut));
    assert_eq!(second, Resolution::Empty(FallbackReason::TimedOut));
    assert_eq!(third.into_result().unwrap().code, "<p>three</p>");
    assert_eq!(preprocessor.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_oversized_result_is_reported_as_failure() {
    let config = BridgeConfig {
        capacity: 16,
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::new(Scripted::shared(), config, Value::Null);

    let resolution = bridge.preprocess(TS_SOURCE, "Counter.svelte").unwrap();

    assert_eq!(resolution, Resolution::Empty(FallbackReason::WorkerFailed));
}

#[test]
fn test_transform_config_reaches_worker() {
    struct Echo;

    impl Preprocessor for Echo {
        fn preprocess<'a>(
            &'a self,
            request: &'a Request,
        ) -> BoxFuture<'a, Result<Processed, PreprocessError>> {
            Box::pin(async move {
                Ok(Processed {
                    code: request.config.to_string(),
                    dependencies: vec![request.filename.clone()],
                    ..Processed::default()
                })
            })
        }
    }

    let config = json!({ "typescript": { "tsconfigFile": "./tsconfig.json" } });
    let mut bridge = Bridge::new(Arc::new(Echo), BridgeConfig::default(), config.clone());

    let result = bridge.preprocess("<p/>", "").unwrap().into_result().unwrap();

    assert_eq!(result.code, config.to_string());
    assert_eq!(result.dependencies, vec!["unknown".to_string()]);
}
