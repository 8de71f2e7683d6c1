use std::sync::{Arc, Mutex};
use std::time::Duration;

use intelligence::bridge::{
    Callable, CallbackArg, DirectBinding, MessageChannelBridge, ProtocolError, ScriptEvaluator,
};
use intelligence::intelligence_runtime::scripted::{ScriptedModel, ScriptedRuntime};
use intelligence::{ModelCatalog, ModelClass, ModelConfiguration, Session};
use serde_json::json;
use tokio::time::{sleep, Instant};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingEvaluator {
    scripts: Mutex<Vec<String>>,
}

impl RecordingEvaluator {
    fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Poll until a script equal to `expected` has been evaluated
    async fn wait_for(&self, expected: &str) {
        let deadline = Instant::now() + WAIT;
        while !self.scripts().iter().any(|s| s == expected) {
            assert!(
                Instant::now() < deadline,
                "never evaluated {:?}, got {:?}",
                expected,
                self.scripts()
            );
            sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ScriptEvaluator for RecordingEvaluator {
    fn evaluate(&self, script: String) {
        self.scripts.lock().unwrap().push(script);
    }
}

fn start(model: ScriptedModel) -> Session {
    let catalog = ModelCatalog::new(
        vec![ModelConfiguration::new("demo-model", "Demo", ModelClass::Chat)],
        "demo-model",
    )
    .unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().with_model("demo-model", model));
    Session::builder(runtime).catalog(catalog).start().unwrap()
}

fn bridge(session: &Session) -> (MessageChannelBridge, Arc<RecordingEvaluator>) {
    let evaluator = Arc::new(RecordingEvaluator::default());
    let bridge = MessageChannelBridge::new(session.handle(), evaluator.clone());
    (bridge, evaluator)
}

#[tokio::test(flavor = "multi_thread")]
async fn load_model_message_reports_status_then_complete() {
    let session = start(ScriptedModel::new(4));
    let (bridge, evaluator) = bridge(&session);

    bridge
        .post_message(json!({
            "method": "loadModel",
            "modelName": "demo-model",
            "onStatus": "onStatus_1",
            "onComplete": "onComplete_1",
            "onError": "onError_1",
        }))
        .unwrap();
    evaluator.wait_for("onComplete_1(true);").await;

    assert_eq!(
        evaluator.scripts(),
        vec![
            "onStatus_1(0);",
            "onStatus_1(0.25);",
            "onStatus_1(0.5);",
            "onStatus_1(0.75);",
            "onStatus_1(1);",
            "onComplete_1(true);",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_model_message_streams_then_completes() {
    let model = ScriptedModel::new(6).with_vocabulary(["say \"hi\"\n"]);
    let session = start(model.clone());
    let (bridge, evaluator) = bridge(&session);

    bridge
        .post_raw(
            r#"{"method":"invokeModel","modelName":"demo-model","prompt":"greet",
                "onComplete":"done","onStream":"partial","onError":"failed"}"#,
        )
        .unwrap();
    let expected_complete = format!(
        "done({});",
        intelligence::bridge::escape::js_string_literal(&model.text_for(6))
    );
    evaluator.wait_for(&expected_complete).await;

    let scripts = evaluator.scripts();
    assert_eq!(scripts.len(), 2);
    assert_eq!(
        scripts[0],
        r#"partial("say \"hi\"\nsay \"hi\"\nsay \"hi\"\nsay \"hi\"\n");"#
    );
    assert_eq!(scripts[1], expected_complete);
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_of_unknown_model_fires_error_callback() {
    let session = start(ScriptedModel::new(4));
    let (bridge, evaluator) = bridge(&session);

    bridge
        .post_message(json!({
            "method": "invokeModel",
            "modelName": "missing-model",
            "prompt": "hi",
            "onComplete": "done",
            "onStream": "partial",
            "onError": "failed",
        }))
        .unwrap();
    evaluator
        .wait_for(r#"failed("Model not found in catalog: missing-model");"#)
        .await;

    assert_eq!(evaluator.scripts().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_invokes_are_answered_independently() {
    let session = start(ScriptedModel::new(100_000).with_token_delay(Duration::from_millis(1)));
    let (bridge, evaluator) = bridge(&session);
    let invoke = |suffix: &str| {
        json!({
            "method": "invokeModel",
            "modelName": "demo-model",
            "prompt": "hi",
            "onComplete": format!("done_{}", suffix),
            "onStream": format!("partial_{}", suffix),
            "onError": format!("failed_{}", suffix),
        })
    };

    let first = bridge.post_message(invoke("a")).unwrap();
    let second = bridge.post_message(invoke("b")).unwrap();
    assert_ne!(first, second);
    evaluator
        .wait_for(r#"failed_b("A generation is already running");"#)
        .await;

    session.stop();
    let deadline = Instant::now() + WAIT;
    while !evaluator.scripts().iter().any(|s| s.starts_with("done_a(")) {
        assert!(Instant::now() < deadline, "first invoke never completed");
        sleep(Duration::from_millis(5)).await;
    }

    let scripts = evaluator.scripts();
    assert!(!scripts.iter().any(|s| s.starts_with("failed_a(")));
    assert!(!scripts.iter().any(|s| s.starts_with("done_b(") || s.starts_with("partial_b(")));
}

#[tokio::test(flavor = "multi_thread")]
async fn is_model_downloaded_follows_successful_loads() {
    let session = start(ScriptedModel::new(4));
    let (bridge, evaluator) = bridge(&session);
    let query = |name: &str| {
        json!({
            "method": "isModelDownloaded",
            "modelName": "demo-model",
            "onResult": name,
        })
    };

    bridge.post_message(query("before")).unwrap();
    evaluator.wait_for("before(false);").await;
    session.load_model("demo-model", |_| {}).await.unwrap();
    bridge.post_message(query("after")).unwrap();
    evaluator.wait_for("after(true);").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_messages_never_reach_the_session() {
    let session = start(ScriptedModel::new(4));
    let (bridge, evaluator) = bridge(&session);

    let missing_method = bridge.post_message(json!({ "modelName": "demo-model" }));
    let unknown_method = bridge.post_message(json!({ "method": "deleteModel" }));
    let missing_callback = bridge.post_message(json!({
        "method": "loadModel",
        "modelName": "demo-model",
        "onStatus": "s",
        "onComplete": "c",
    }));
    let injected_name = bridge.post_message(json!({
        "method": "isModelDownloaded",
        "modelName": "demo-model",
        "onResult": "alert(1);x",
    }));
    let not_json = bridge.post_raw("loadModel(demo-model)");

    assert!(matches!(missing_method, Err(ProtocolError::MissingMethod)));
    assert!(matches!(unknown_method, Err(ProtocolError::UnknownMethod(m)) if m == "deleteModel"));
    assert!(matches!(missing_callback, Err(ProtocolError::Malformed(_))));
    assert!(injected_name.is_err());
    assert!(matches!(not_json, Err(ProtocolError::Malformed(_))));

    sleep(Duration::from_millis(50)).await;
    assert!(evaluator.scripts().is_empty());
    assert_eq!(session.snapshot().load_phase, intelligence::LoadPhase::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_binding_calls_back_with_values() {
    let session = start(ScriptedModel::new(4));
    let binding = DirectBinding::new(session.handle());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = |label: &'static str| -> Callable {
        let calls = calls.clone();
        Arc::new(move |arg: CallbackArg| calls.lock().unwrap().push((label, arg)))
    };

    binding.load_model(
        "demo-model",
        recorder("status"),
        recorder("complete"),
        recorder("error"),
    );
    let deadline = Instant::now() + WAIT;
    while !calls.lock().unwrap().iter().any(|(label, _)| *label == "complete") {
        assert!(Instant::now() < deadline, "load never completed");
        sleep(Duration::from_millis(5)).await;
    }

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 6);
    assert_eq!(calls[0], ("status", CallbackArg::Number(0.0)));
    assert_eq!(calls[5], ("complete", CallbackArg::Bool(true)));
    assert!(!calls.iter().any(|(label, _)| *label == "error"));
}
