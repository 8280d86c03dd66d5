//! Forced-endpoint scenarios
//!
//! A forced endpoint bypasses selection entirely; a forced endpoint with
//! an open breaker fails fast with no HTTP call and no success record.

use std::str::FromStr;
use std::sync::Arc;
use switchyard::config::Config;
use switchyard::handlers::AppState;
use switchyard::tools::query::{self, QueryArgs};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(local_url: &str, cloud_url: &str) -> Config {
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 3100

[[endpoints]]
name = "local"
base_url = "{local_url}"
model = "local-model"
priority = 1
max_context_tokens = 32768
max_response_tokens = 4096
kind = "local"

[[endpoints]]
name = "cloud_a"
base_url = "{cloud_url}"
model = "cloud-model"
priority = 2
max_context_tokens = 65536
max_response_tokens = 8192
kind = "cloud"
"#
    );
    Config::from_str(&toml).expect("test config must parse")
}

fn forced_args(endpoint: &str) -> QueryArgs {
    QueryArgs {
        prompt: "Route me somewhere specific".to_string(),
        context: None,
        task_hint: None,
        force_endpoint: Some(endpoint.to_string()),
        max_tokens: None,
        file_inputs: None,
    }
}

#[tokio::test]
async fn test_forced_endpoint_with_open_breaker_fails_without_http() {
    let local = MockServer::start().await;
    let cloud = MockServer::start().await;
    // No HTTP call may reach the forced endpoint.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&cloud)
        .await;

    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    state
        .registry()
        .get("cloud_a")
        .unwrap()
        .breaker()
        .force_open();

    let failure = query::run(&state, forced_args("cloud_a"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.error.kind(), "endpoint_open");
    assert_eq!(
        state.execution_log().successes(),
        0,
        "no success record may exist"
    );
    assert_eq!(state.execution_log().counters().total, 0);
}

#[tokio::test]
async fn test_forced_endpoint_overrides_priority_order() {
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&local)
        .await;

    let cloud = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "forced reply"}}]
        })))
        .expect(1)
        .mount(&cloud)
        .await;

    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    let reply = query::run(&state, forced_args("cloud_a"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reply.metadata.routing_decision.endpoint_used, "cloud_a");
    assert_eq!(reply.metadata.routing_decision.method, "forced");
    assert_eq!(reply.metadata.routing_decision.confidence_percent, 100);
}

#[tokio::test]
async fn test_forced_endpoint_accepted_after_cooldown_elapses() {
    let local = MockServer::start().await;
    let cloud = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "recovered"}}]
        })))
        .expect(1)
        .mount(&cloud)
        .await;

    // Zero cooldown: the breaker opens and is immediately half-open-able.
    let toml = format!(
        r#"
[server]
host = "127.0.0.1"
port = 3100

[[endpoints]]
name = "local"
base_url = "{}/v1"
model = "local-model"
priority = 1
max_context_tokens = 32768
max_response_tokens = 4096
kind = "local"

[[endpoints]]
name = "cloud_a"
base_url = "{}/v1"
model = "cloud-model"
priority = 2
max_context_tokens = 65536
max_response_tokens = 8192
kind = "cloud"

[breaker]
open_ms = 0
"#,
        local.uri(),
        cloud.uri()
    );
    let config = Arc::new(Config::from_str(&toml).unwrap());
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    state
        .registry()
        .get("cloud_a")
        .unwrap()
        .breaker()
        .force_open();

    let reply = query::run(&state, forced_args("cloud_a"), &CancellationToken::new())
        .await
        .expect("cooled-down forced endpoint must be served");
    assert_eq!(reply.response, "recovered");
    assert_eq!(reply.metadata.routing_decision.endpoint_used, "cloud_a");
}

#[tokio::test]
async fn test_forced_unknown_endpoint_rejected() {
    let local = MockServer::start().await;
    let cloud = MockServer::start().await;
    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    let failure = query::run(&state, forced_args("nonexistent"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), "invalid_request");
}
