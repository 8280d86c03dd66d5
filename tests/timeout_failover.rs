//! Timeout failover scenario
//!
//! The priority-1 local endpoint sleeps past its per-endpoint timeout;
//! the cloud endpoint answers fast. The request completes on the cloud
//! with two recorded attempts, and the local breaker sees one failure.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use switchyard::config::Config;
use switchyard::endpoints::Outcome;
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

[routing]
request_timeout_base_ms = 300
"#
    );
    Config::from_str(&toml).expect("test config must parse")
}

fn completion_json(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 40, "completion_tokens": 10, "total_tokens": 50}
    })
}

#[tokio::test]
async fn test_timeout_fails_over_to_cloud() {
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_json("too late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&local)
        .await;

    let cloud = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_json("from the cloud")))
        .mount(&cloud)
        .await;

    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    // ~200 chars of prompt, no complex markers: the scaled timeout stays
    // near the 300 ms base, far below the local mock's 5 s delay.
    let prompt = "Please summarize the following short passage about borrowing and lifetimes \
                  so that a new contributor can follow it without reading the whole book first.";

    let reply = query::run(
        &state,
        QueryArgs {
            prompt: prompt.to_string(),
            context: None,
            task_hint: None,
            force_endpoint: None,
            max_tokens: None,
            file_inputs: None,
        },
        &CancellationToken::new(),
    )
    .await
    .expect("failover must succeed");

    assert_eq!(reply.metadata.routing_decision.endpoint_used, "cloud_a");
    assert_eq!(reply.metadata.routing_decision.method, "failover");
    assert_eq!(reply.metadata.attempts.len(), 2);
    assert_eq!(reply.metadata.attempts[0].endpoint, "local");
    assert_eq!(reply.metadata.attempts[0].outcome, Outcome::Timeout);
    assert_eq!(reply.metadata.attempts[1].endpoint, "cloud_a");
    assert_eq!(reply.metadata.attempts[1].outcome, Outcome::Success);

    // The local endpoint's failure count moved by exactly one.
    let snapshot = state
        .registry()
        .snapshots()
        .into_iter()
        .find(|s| s.name == "local")
        .unwrap();
    assert_eq!(snapshot.failure_count, 1);
    assert_eq!(snapshot.breaker_state, "closed");
}

#[tokio::test]
async fn test_capacity_response_fails_over() {
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&local)
        .await;

    let cloud = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_json("spillover")))
        .mount(&cloud)
        .await;

    let config = Arc::new(config_for(
        &format!("{}/v1", local.uri()),
        &format!("{}/v1", cloud.uri()),
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    let reply = query::run(
        &state,
        QueryArgs {
            prompt: "Give me a haiku about queues".to_string(),
            context: None,
            task_hint: None,
            force_endpoint: None,
            max_tokens: None,
            file_inputs: None,
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(reply.metadata.routing_decision.endpoint_used, "cloud_a");
    assert_eq!(reply.metadata.attempts[0].outcome, Outcome::Capacity);
}

#[tokio::test]
async fn test_all_endpoints_down_reports_attempts_and_kind() {
    let config = Arc::new(config_for(
        "http://127.0.0.1:9/v1",
        "http://127.0.0.1:9/v1",
    ));
    let state = AppState::new(config, CancellationToken::new()).unwrap();

    let failure = query::run(
        &state,
        QueryArgs {
            prompt: "anyone there?".to_string(),
            context: None,
            task_hint: None,
            force_endpoint: None,
            max_tokens: None,
            file_inputs: None,
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(failure.error.kind(), "network");
    assert!(failure.endpoints_attempted.contains(&"local".to_string()));
    assert!(failure.endpoints_attempted.contains(&"cloud_a".to_string()));
}
