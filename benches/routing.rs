//! Routing hot-path benchmarks
//!
//! Measures the non-I/O pipeline: fingerprinting, classification, and
//! candidate selection. None of these touch the network; a routed request
//! should spend its time in the endpoint call, not in the router.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use switchyard::classify::classify;
use switchyard::config::Config;
use switchyard::endpoints::EndpointRegistry;
use switchyard::fingerprint::fingerprint;
use switchyard::learner::EmpiricalLearner;
use switchyard::request::RouterRequest;
use switchyard::router::SmartRouter;

const PROMPTS: &[(&str, &str)] = &[
    ("simple", "Write a function to reverse a string in Go."),
    (
        "debugging",
        "Why is my React component not working after the state update? The stack trace \
         points at a hook ordering problem.",
    ),
    (
        "complex",
        "Design a distributed microservices architecture for order processing with \
         fault-tolerant orchestration, enterprise compliance audits, and an end-to-end \
         migration of the database schema to the cloud platform.",
    ),
];

fn bench_config() -> Config {
    Config::from_str(
        r#"
[server]
host = "127.0.0.1"
port = 3100

[[endpoints]]
name = "local"
base_url = "http://127.0.0.1:18080/v1"
model = "m-local"
priority = 1
max_context_tokens = 32768
max_response_tokens = 4096
kind = "local"
capabilities = ["code", "fim"]

[[endpoints]]
name = "cloud_a"
base_url = "http://127.0.0.1:18081/v1"
model = "m-cloud"
priority = 2
max_context_tokens = 65536
max_response_tokens = 8192
kind = "cloud"
capabilities = ["code", "reasoning", "large_context"]
"#,
    )
    .expect("bench config must parse")
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    for (name, prompt) in PROMPTS {
        let request = RouterRequest::new(*prompt, Duration::from_secs(60));
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, req| {
            b.iter(|| fingerprint(req));
        });
    }
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for (name, prompt) in PROMPTS {
        let request = RouterRequest::new(*prompt, Duration::from_secs(60));
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, req| {
            b.iter(|| classify(req));
        });
    }
    group.finish();
}

fn bench_route_plan(c: &mut Criterion) {
    let config = bench_config();
    let registry = EndpointRegistry::from_config(&config).expect("registry builds");
    let learner = Arc::new(EmpiricalLearner::new(10_000));
    let router = SmartRouter::new(registry, learner, config.routing);

    let mut group = c.benchmark_group("route_plan");
    for (name, prompt) in PROMPTS {
        let request = RouterRequest::new(*prompt, Duration::from_secs(60));
        let fp = fingerprint(&request);
        let cls = classify(&request);
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(request, fp, cls),
            |b, (req, fp, cls)| {
                b.iter(|| router.route(req, fp, cls).expect("route must succeed"));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_classify, bench_route_plan);
criterion_main!(benches);
