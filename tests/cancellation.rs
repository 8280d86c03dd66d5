//! Cancellation safety
//!
//! When the request's cancellation fires during execution, the call
//! aborts immediately, no failover happens, and no success record is
//! committed for the request.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
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

#[tokio::test]
async fn test_cancel_during_execution_no_success_no_failover() {
    // Both endpoints are slow; the fast-answering cloud must never be
    // consulted because cancellation forbids failover.
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "slow"}}]
                }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&local)
        .await;

    let cloud = MockServer::start().await;
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

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let failure = query::run(
        &state,
        QueryArgs {
            prompt: "This will be cancelled mid-flight".to_string(),
            context: None,
            task_hint: None,
            force_endpoint: None,
            max_tokens: None,
            file_inputs: None,
        },
        &cancel,
    )
    .await
    .unwrap_err();

    assert_eq!(failure.error.kind(), "cancelled");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation must abort promptly"
    );
    assert_eq!(
        state.execution_log().successes(),
        0,
        "no success record after cancellation"
    );
}

#[tokio::test]
async fn test_pre_cancelled_token_aborts_before_any_call() {
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&local)
        .await;
    let cloud = MockServer::start().await;

    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = query::run(
        &state,
        QueryArgs {
            prompt: "never sent".to_string(),
            context: None,
            task_hint: None,
            force_endpoint: None,
            max_tokens: None,
            file_inputs: None,
        },
        &cancel,
    )
    .await
    .unwrap_err();

    assert_eq!(failure.error.kind(), "cancelled");
}
