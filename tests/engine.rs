use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

mod support;

use async_trait::async_trait;

use switchyard::config::EngineConfig;
use switchyard::error::ConfigError;
use switchyard::handler::{FunctionHandler, Properties};
use switchyard::model::{
    is_valid_parameter_name, ApiSpec, FunctionRequest, FunctionResult, FunctionSpec, EXCEPTION_CLASS,
    EXCEPTION_MESSAGE,
};
use switchyard::protocol::convention::{Inbound, Method, Payload};
use switchyard::server::meta::MetaFunction;
use switchyard::server::interceptor::Interceptor;
use switchyard::server::{EngineBuilder, EngineState};

use support::{call, error_code, result_data, result_param, standard, LOCAL};

#[tokio::test]
async fn echo_through_standard_convention() {
    let engine = support::start().await;
    assert_eq!(engine.state(), EngineState::Ready);

    let outbound = call(&engine, "Echo", &[("in", "hello")]).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(error_code(&outbound), None);
    assert_eq!(result_param(&outbound, "out").as_deref(), Some("hello"));
}

#[tokio::test]
async fn unknown_function_is_not_found() {
    let engine = support::start().await;
    let outbound = call(&engine, "Nope", &[]).await;
    assert_eq!(outbound.status, 404);
    assert_eq!(error_code(&outbound).as_deref(), Some("_NoSuchFunction"));

    let outbound = call(&engine, "_Nope", &[]).await;
    assert_eq!(outbound.status, 404);
}

#[tokio::test]
async fn missing_parameter_is_reported_as_defect() {
    let engine = support::start().await;
    let outbound = call(&engine, "Echo", &[]).await;
    assert_eq!(outbound.status, 400);
    assert_eq!(error_code(&outbound).as_deref(), Some("_InvalidRequest"));
    let data = result_data(&outbound).expect("defects");
    let missing = data.child("missing-param").expect("missing-param defect");
    assert_eq!(missing.attribute("param"), Some("in"));
}

#[tokio::test]
async fn invalid_type_and_undeclared_parameters() {
    let engine = support::start().await;
    let outbound = call(&engine, "Add", &[("a", "2"), ("b", "three")]).await;
    assert_eq!(outbound.status, 400);
    let defect = result_data(&outbound)
        .and_then(|data| data.child("invalid-value-for-type"))
        .expect("type defect");
    assert_eq!(defect.attribute("param"), Some("b"));
    assert_eq!(defect.attribute("type"), Some("_int32"));

    let outbound = call(&engine, "Add", &[("a", "2"), ("b", "3"), ("extra", "x")]).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(result_param(&outbound, "sum").as_deref(), Some("5"));
}

#[tokio::test]
async fn reserved_parameter_name_is_rejected() {
    let engine = support::start().await;
    let outbound = call(&engine, "Echo", &[("in", "x"), ("function", "Echo")]).await;
    assert_eq!(outbound.status, 400);
    assert_eq!(error_code(&outbound).as_deref(), Some("_InvalidRequest"));
}

#[tokio::test]
async fn exclusive_combination_is_enforced() {
    let engine = support::start().await;

    let outbound = call(&engine, "Choose", &[("left", "1"), ("right", "2")]).await;
    assert_eq!(outbound.status, 400);
    let combo = result_data(&outbound).and_then(|d| d.child("param-combo")).expect("combo defect");
    assert_eq!(combo.attribute("type"), Some("exclusive-parameters"));

    assert_eq!(call(&engine, "Choose", &[]).await.status, 400);
    assert_eq!(call(&engine, "Choose", &[("right", "2")]).await.status, 200);
}

#[tokio::test]
async fn handler_failures_become_internal_errors() {
    let engine = support::start().await;

    let outbound = call(&engine, "Fail", &[]).await;
    assert_eq!(outbound.status, 500);
    assert_eq!(error_code(&outbound).as_deref(), Some("_InternalError"));
    assert_eq!(result_param(&outbound, EXCEPTION_CLASS).as_deref(), Some("error"));
    assert!(result_param(&outbound, EXCEPTION_MESSAGE)
        .expect("message")
        .contains("database unreachable"));

    let outbound = call(&engine, "Boom", &[]).await;
    assert_eq!(outbound.status, 500);
    assert_eq!(result_param(&outbound, EXCEPTION_CLASS).as_deref(), Some("panic"));
    assert_eq!(result_param(&outbound, EXCEPTION_MESSAGE).as_deref(), Some("handler exploded"));

    // the engine keeps serving after a panic
    assert_eq!(call(&engine, "Echo", &[("in", "still here")]).await.status, 200);
}

#[tokio::test]
async fn invalid_output_becomes_invalid_response() {
    let engine = support::start().await;

    let outbound = call(&engine, "Sloppy", &[]).await;
    assert_eq!(outbound.status, 500);
    assert_eq!(error_code(&outbound).as_deref(), Some("_InvalidResponse"));

    let outbound = call(&engine, "Lookup", &[("key", "bogus")]).await;
    assert_eq!(error_code(&outbound).as_deref(), Some("_InvalidResponse"));
    let defect = result_data(&outbound)
        .and_then(|d| d.child("undeclared-error-code"))
        .expect("undeclared code defect");
    assert_eq!(defect.attribute("code"), Some("Undeclared"));
}

#[tokio::test]
async fn declared_application_error_is_a_regular_answer() {
    let engine = support::start().await;
    let outbound = call(&engine, "Lookup", &[("key", "missing")]).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(error_code(&outbound).as_deref(), Some("NotFound"));

    let outbound = call(&engine, "Lookup", &[("key", "abc")]).await;
    assert_eq!(result_param(&outbound, "value").as_deref(), Some("ABC"));
}

#[tokio::test]
async fn data_section_is_validated_and_passed_on() {
    let engine = support::start().await;
    let data = switchyard::xml::Element::new("data")
        .with_child(switchyard::xml::Element::new("item").with_attribute("id", "1").with_text("a"))
        .with_child(switchyard::xml::Element::new("item").with_attribute("id", "2").with_text("b"));

    let mut inbound = standard("Store", &[]);
    inbound.embedded_data = Some(data);
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(result_param(&outbound, "stored").as_deref(), Some("2"));

    let mut inbound = standard("Store", &[]);
    inbound.embedded_data = Some(
        switchyard::xml::Element::new("data")
            .with_child(switchyard::xml::Element::new("item").with_attribute("id", "first")),
    );
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 400);
    let defect = result_data(&outbound)
        .and_then(|d| d.child("invalid-value-for-type"))
        .expect("attribute defect");
    assert_eq!(defect.attribute("element"), Some("item"));
}

#[tokio::test]
async fn disabled_function_answers_fixed_result() {
    let engine = support::start().await;

    let outbound = call(&engine, "_DisableFunction", &[("functionName", "Echo")]).await;
    assert_eq!(outbound.status, 200);

    let outbound = call(&engine, "Echo", &[("in", "x")]).await;
    assert_eq!(outbound.status, 503);
    assert_eq!(error_code(&outbound).as_deref(), Some("_DisabledFunction"));

    let json = Inbound::post_json(serde_json::json!({
        "jsonrpc": "2.0", "method": "Echo", "params": {"in": "x"}, "id": 3
    }));
    let outbound = engine.handle(json, LOCAL).await;
    let body = support::json_body(&outbound);
    assert_eq!(body["error"]["message"], "_DisabledFunction");

    // other functions are unaffected
    assert_eq!(call(&engine, "Add", &[("a", "1"), ("b", "1")]).await.status, 200);

    call(&engine, "_EnableFunction", &[("functionName", "Echo")]).await;
    let outbound = call(&engine, "Echo", &[("in", "x")]).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(result_param(&outbound, "out").as_deref(), Some("x"));
}

#[tokio::test]
async fn disabled_api_only_accepts_enable() {
    let engine = support::start().await;

    assert_eq!(call(&engine, "_DisableAPI", &[]).await.status, 200);
    assert!(engine.api().is_disabled());
    assert_eq!(call(&engine, "Echo", &[("in", "x")]).await.status, 503);
    assert_eq!(call(&engine, "_NoOp", &[]).await.status, 503);

    assert_eq!(call(&engine, "_EnableAPI", &[]).await.status, 200);
    assert_eq!(call(&engine, "Echo", &[("in", "x")]).await.status, 200);
}

#[tokio::test]
async fn head_skips_the_function() {
    let engine = support::start().await;
    let before = engine.api().function("Echo").expect("Echo").call_count();

    let inbound = standard("Echo", &[]).with_method(Method::Head);
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(outbound.body, Payload::Empty);

    // the call is counted but no validation happens
    assert_eq!(engine.api().function("Echo").expect("Echo").call_count(), before + 1);
}

#[tokio::test]
async fn method_classification() {
    let engine = support::start().await;

    let outbound = engine.handle(Inbound::new(Method::Options), LOCAL).await;
    assert_eq!(outbound.status, 200);
    let allow = outbound.header("Allow").expect("Allow header");
    assert!(allow.contains("GET"));
    assert!(allow.contains("POST"));

    let outbound = engine.handle(standard("Echo", &[("in", "x")]).with_method(Method::Delete), LOCAL).await;
    assert_eq!(outbound.status, 501);

    let inbound = standard("Echo", &[("in", "x")]).with_parameter("_convention", "json-rpc-2.0");
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 405);
    assert_eq!(outbound.header("Allow"), Some("POST, OPTIONS"));
}

#[tokio::test]
async fn convention_selection_failures() {
    let engine = support::start().await;

    let inbound = standard("Echo", &[("in", "x")]).with_parameter("_convention", "carrier-pigeon");
    assert_eq!(engine.handle(inbound, LOCAL).await.status, 400);

    let inbound = Inbound::post_json(serde_json::json!({"hello": "world"}));
    assert_eq!(engine.handle(inbound, LOCAL).await.status, 400);
}

#[tokio::test]
async fn default_convention_wins_when_it_matches() {
    let config = EngineConfig::from_toml(
        r#"
        [engine]
        default_convention = "soap-map"
        "#,
    )
    .expect("config");
    let engine = support::start_with(config).await;

    let registry = switchyard::protocol::convention::ConventionRegistry::default();
    let request = FunctionRequest::new("Echo", support::params(&[("in", "mapped")]), None).expect("request");
    let inbound = registry.get("soap").expect("soap").render_request(&request);
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    let response = support::xml_body(&outbound)
        .child("Body")
        .and_then(|body| body.child("EchoResponse"))
        .expect("response element");
    assert_eq!(response.child("out").map(|e| e.text_or_empty()), Some("mapped"));
}

#[tokio::test]
async fn malformed_caller_address_is_fatal() {
    let engine = support::start().await;
    let outbound = engine.handle(standard("Echo", &[("in", "x")]), "not-an-address").await;
    assert_eq!(outbound.status, 500);
    assert_eq!(outbound.body, Payload::Empty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_are_all_counted() {
    let engine = support::start().await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let noop = call(&engine, "_NoOp", &[]).await;
            let echo = call(&engine, "Echo", &[("in", &i.to_string())]).await;
            (noop.status, echo.status)
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("task"), (200, 200));
    }

    assert_eq!(engine.api().meta_call_count(MetaFunction::NoOp), 20);
    let echo = engine.api().function("Echo").expect("Echo");
    assert_eq!(echo.call_count(), 20);
    let snapshot = echo.statistics().snapshot();
    assert_eq!(snapshot.successful.count, 20);
    assert_eq!(snapshot.unsuccessful.count, 0);
}

struct Flaky {
    fail_bootstrap: bool,
    fail_initialize: AtomicBool,
}

#[async_trait]
impl FunctionHandler for Flaky {
    async fn bootstrap(&self, _properties: &Properties) -> anyhow::Result<()> {
        if self.fail_bootstrap {
            anyhow::bail!("no storage");
        }
        Ok(())
    }

    async fn initialize(&self, _properties: &Properties) -> anyhow::Result<()> {
        if self.fail_initialize.swap(false, Ordering::AcqRel) {
            anyhow::bail!("bad property");
        }
        Ok(())
    }

    async fn call(&self, _request: &FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
        Ok(FunctionResult::success())
    }
}

fn flaky_builder(fail_bootstrap: bool, fail_initialize: bool) -> EngineBuilder {
    support::init_tracing();
    EngineBuilder::new(ApiSpec::new("flaky").function(FunctionSpec::new("Ping"))).handler(
        "Ping",
        Arc::new(Flaky { fail_bootstrap, fail_initialize: AtomicBool::new(fail_initialize) }),
    )
}

#[tokio::test]
async fn failed_bootstrap_refuses_calls_with_server_error() {
    let engine = flaky_builder(true, false).start().await.expect("engine");
    assert_eq!(engine.state(), EngineState::ApiBootstrapFailed);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 500);
}

#[tokio::test]
async fn initialization_can_be_retried_after_failure() {
    let engine = flaky_builder(false, true).start().await.expect("engine");
    assert_eq!(engine.state(), EngineState::ApiInitializationFailed);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 500);

    engine.reinitialize(EngineConfig::default()).await.expect("second initialization");
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 200);

    // and again from ready
    engine.reinitialize(EngineConfig::default()).await.expect("third initialization");
    assert_eq!(engine.state(), EngineState::Ready);
}

/// Handler refusing to initialize while `mode` is `broken`
struct Picky;

#[async_trait]
impl FunctionHandler for Picky {
    async fn initialize(&self, properties: &Properties) -> anyhow::Result<()> {
        if properties.get("mode").map(String::as_str) == Some("broken") {
            anyhow::bail!("cannot run broken");
        }
        Ok(())
    }

    async fn call(&self, _request: &FunctionRequest, _call_id: u64) -> anyhow::Result<FunctionResult> {
        Ok(FunctionResult::success())
    }
}

/// Interceptor counting how often it was initialized
#[derive(Default)]
struct InitCounter(AtomicUsize);

#[async_trait]
impl Interceptor for InitCounter {
    fn name(&self) -> &'static str {
        "init-counter"
    }

    async fn initialize(&self, _config: &EngineConfig) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn failed_reinitialization_keeps_the_previous_configuration() {
    support::init_tracing();
    let counter = Arc::new(InitCounter::default());
    let config = EngineConfig::from_toml(
        r#"
        [acl]
        api = "deny * Ping; allow 127.0.0.0/8 *"
        "#,
    )
    .expect("config");
    let engine = EngineBuilder::new(ApiSpec::new("picky").function(FunctionSpec::new("Ping")))
        .handler("Ping", Arc::new(Picky))
        .interceptor(counter.clone())
        .config(config)
        .start()
        .await
        .expect("engine");
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 403);

    // an invalid configuration is refused before anything changes
    let mut invalid = (*engine.config()).clone();
    invalid.acl.api = "permit * *".to_string();
    let err = engine.reinitialize(invalid).await.expect_err("invalid rules");
    assert!(matches!(err, ConfigError::Validation(_)), "{err:?}");
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 403);

    // a refusing handler leaves the old rules and interceptors in place
    let mut refused = (*engine.config()).clone();
    refused.acl.api = "allow * *".to_string();
    refused.properties.insert("mode".to_string(), "broken".to_string());
    let err = engine.reinitialize(refused).await.expect_err("handler refuses");
    assert!(matches!(err, ConfigError::Initialization(_)), "{err:?}");
    assert!(err.to_string().contains("cannot run broken"), "{err}");
    assert_eq!(engine.state(), EngineState::ApiInitializationFailed);
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(engine.config().acl.api, "deny * Ping; allow 127.0.0.0/8 *");
    assert!(!engine.api().access().allowed_ip("127.0.0.1".parse().expect("ip"), "Ping", None));

    let mut fixed = (*engine.config()).clone();
    fixed.acl.api = "allow * *".to_string();
    engine.reinitialize(fixed).await.expect("fixed configuration");
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    assert_eq!(call(&engine, "Ping", &[]).await.status, 200);
}

#[tokio::test]
async fn construction_fails_without_handler() {
    support::init_tracing();
    let spec = ApiSpec::new("incomplete").function(FunctionSpec::new("Orphan"));
    let err = EngineBuilder::new(spec).start().await.err().expect("construction error");
    assert!(matches!(err, ConfigError::Validation(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn disposed_engine_is_unavailable() {
    let engine = support::start().await;
    engine.dispose().await;
    assert_eq!(engine.state(), EngineState::Disposed);
    assert_eq!(call(&engine, "Echo", &[("in", "x")]).await.status, 503);
    assert_eq!(
        engine.api().function("Echo").expect("Echo").lifecycle_state(),
        switchyard::server::lifecycle::LifecycleState::Unusable
    );

    // disposing twice is harmless
    engine.dispose().await;
    assert_eq!(engine.state(), EngineState::Disposed);
}

#[test]
fn parameter_names() {
    for name in ["a", "Zed", "a1", "first.last", "snake_case", "kebab-case", "_forwarded"] {
        assert!(is_valid_parameter_name(name), "{name}");
    }
    for name in ["", "1a", "_hidden", ".dot", "-dash", "has space", "caf\u{e9}", "a/b", "a\n"] {
        assert!(!is_valid_parameter_name(name), "{name:?}");
    }

    let err = FunctionRequest::new("Echo", support::params(&[("9lives", "x")]), None).expect_err("bad name");
    assert!(err.to_string().contains("9lives"), "{err}");
}
