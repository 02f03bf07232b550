// tests/convergence.rs

mod common;
use crate::common::{fast_options, init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use stackdag::api::{ApiError, ApiOp, Fault, InMemoryNetworkApi};
use stackdag::dag::{DesiredState, ResourceStatus, Targets};
use stackdag::engine::{converge, EngineOptions};
use stackdag::errors::StackdagError;
use stackdag::resource::schema_for;
use stackdag::task::{RetryPolicy, TaskError};
use stackdag::types::FailurePolicy;
use stackdag_test_utils::builders::{props, StackBuilder, RULE};

type TestResult = Result<(), Box<dyn Error>>;

fn fail_create(name: &str, status: u16, times: Option<u32>) -> Fault {
    Fault {
        op: ApiOp::Create,
        name: Some(name.to_string()),
        error: ApiError::Status {
            status,
            message: "injected".to_string(),
        },
        times,
    }
}

fn delete_order(api: &InMemoryNetworkApi) -> Vec<String> {
    api.calls()
        .into_iter()
        .filter(|c| c.op == ApiOp::Delete)
        .map(|c| c.collection)
        .collect()
}

#[tokio::test]
async fn dependency_is_created_first_and_referenced_by_id() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo")
        .rule("r", json!({ "action": "allow", "protocol": "tcp" }))
        .policy("p", &["r"]);
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();

    let report = with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    assert!(report.is_success());
    assert_eq!(report.succeeded, vec!["r".to_string(), "p".to_string()]);
    assert_eq!(report.tasks_created, 2);

    let creates: Vec<String> = api
        .calls()
        .into_iter()
        .filter(|c| c.op == ApiOp::Create)
        .map(|c| c.collection)
        .collect();
    assert_eq!(creates, vec!["firewall_rule", "firewall_policy"]);

    let rule_id = stack.resource_id("r").expect("rule created");
    let policy_id = stack.resource_id("p").expect("policy created");
    let remote = api.peek("firewall_policy", &policy_id).expect("policy exists");
    assert_eq!(remote.properties["firewall_rules"], json!([rule_id]));
    assert_eq!(remote.properties["name"], json!("demo-p"));
    assert_eq!(stack.node("p").unwrap().status, ResourceStatus::CreateComplete);
    Ok(())
}

#[tokio::test]
async fn attributes_of_converged_resources_come_from_the_api() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo")
        .rule("r", json!({ "action": "allow" }))
        .policy("p", &["r"]);
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    let rule_id = stack.resource_id("r").expect("rule created");
    assert_eq!(stack.attribute("p", "firewall_rules")?, Some(json!([rule_id])));
    assert_eq!(stack.attribute("p", "name")?, Some(json!("demo-p")));
    assert_eq!(stack.attribute("r", "id")?, Some(json!(rule_id)));

    let shows = api.count(ApiOp::Show);
    assert_eq!(stack.attribute("r", "action")?, Some(json!("allow")));
    assert_eq!(api.count(ApiOp::Show), shows + 1);

    assert!(matches!(
        stack.attribute("r", "status"),
        Err(StackdagError::UnknownAttribute { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn failed_dependency_skips_dependent_and_reports_one_failure() -> TestResult {
    init_tracing();

    // a requires b; b fails permanently.
    let builder = StackBuilder::new("demo").rule("b", json!({})).policy("a", &["b"]);
    let api = builder.api();
    api.inject(fail_create("demo-b", 400, None));
    let mut stack = builder.build();
    let targets = stack.targets();

    let err = with_timeout(converge(&mut stack, &targets, &fast_options()))
        .await
        .unwrap_err();

    match err {
        StackdagError::ConvergenceFailed(failure) => {
            assert_eq!(failure.failed_nodes(), vec!["b"]);
            assert_eq!(failure.skipped, vec!["a".to_string()]);
            assert!(failure.to_string().contains("b: operation failed"));
        }
        other => panic!("expected ConvergenceFailed, got {other:?}"),
    }

    assert_eq!(api.count(ApiOp::Create), 1);
    assert_eq!(stack.node("b").unwrap().status, ResourceStatus::Failed);
    assert!(stack.node("b").unwrap().last_error.is_some());
    assert!(stack.resource_id("a").is_none());
    Ok(())
}

fn fail_show(name: &str, times: Option<u32>) -> Fault {
    Fault {
        op: ApiOp::Show,
        name: Some(name.to_string()),
        error: ApiError::Status {
            status: 400,
            message: "injected".to_string(),
        },
        times,
    }
}

#[tokio::test]
async fn create_failing_after_the_call_keeps_the_id_for_teardown() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({ "protocol": "tcp" }));
    let api = builder.api();
    api.inject(fail_show("demo-r", Some(1)));
    let mut stack = builder.build();
    let targets = stack.targets();

    let err = with_timeout(converge(&mut stack, &targets, &fast_options()))
        .await
        .unwrap_err();
    assert!(matches!(err, StackdagError::ConvergenceFailed(_)), "{err:?}");

    // The rule exists remotely and the stack knows it.
    assert_eq!(api.len(), 1);
    let id = stack.resource_id("r").expect("id recorded despite failure");
    assert!(api.peek("firewall_rule", &id).is_some());
    assert_eq!(stack.node("r").unwrap().status, ResourceStatus::Failed);

    // Converging again does not create a second rule.
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;
    assert_eq!(api.count(ApiOp::Create), 1);
    assert_eq!(api.len(), 1);

    let teardown = stack.teardown_targets();
    let report = with_timeout(converge(&mut stack, &teardown, &fast_options())).await?;
    assert_eq!(report.succeeded, vec!["r".to_string()]);
    assert!(api.is_empty());
    Ok(())
}

#[tokio::test]
async fn independent_sibling_still_converges_after_failure() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo")
        .rule("bad", json!({}))
        .rule("good", json!({}))
        .policy("p", &["bad"]);
    let api = builder.api();
    api.inject(fail_create("demo-bad", 400, None));
    let mut stack = builder.build();
    let targets = stack.targets();

    let err = with_timeout(converge(&mut stack, &targets, &fast_options()))
        .await
        .unwrap_err();
    let StackdagError::ConvergenceFailed(failure) = err else {
        panic!("expected ConvergenceFailed");
    };
    assert_eq!(failure.failed_nodes(), vec!["bad"]);
    assert_eq!(failure.skipped, vec!["p".to_string()]);
    assert!(stack.resource_id("good").is_some());
    Ok(())
}

#[tokio::test]
async fn stop_all_starts_nothing_after_first_failure() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo")
        .rule("a", json!({}))
        .rule("b", json!({}))
        .rule("c", json!({}));
    let api = builder.api();
    api.inject(fail_create("demo-a", 400, None));
    let mut stack = builder.build();
    let targets = stack.targets();

    let mut options = fast_options();
    options.scheduler.max_in_flight = 1;
    options.scheduler.failure_policy = FailurePolicy::StopAll;

    let err = with_timeout(converge(&mut stack, &targets, &options))
        .await
        .unwrap_err();
    let StackdagError::ConvergenceFailed(failure) = err else {
        panic!("expected ConvergenceFailed");
    };
    assert_eq!(failure.failed_nodes(), vec!["a"]);
    assert_eq!(failure.skipped, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(api.count(ApiOp::Create), 1);
    Ok(())
}

#[tokio::test]
async fn second_run_is_a_no_op() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({})).policy("p", &["r"]);
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();

    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;
    let calls_after_first = api.calls().len();

    let report = with_timeout(converge(&mut stack, &targets, &fast_options())).await?;
    assert!(report.is_success());
    assert_eq!(report.tasks_created, 0);
    assert_eq!(report.run_id, 2);
    assert_eq!(api.calls().len(), calls_after_first);
    Ok(())
}

#[tokio::test]
async fn changed_property_is_updated_in_place() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({ "action": "deny" }));
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;
    let id = stack.resource_id("r").unwrap();

    let schema = schema_for(RULE).unwrap();
    let wanted = schema.validate(&props(json!({ "action": "allow" })))?;
    let targets = Targets::from([("r".to_string(), DesiredState::Present(wanted))]);
    let report = with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    assert_eq!(report.succeeded, vec!["r".to_string()]);
    assert_eq!(api.count(ApiOp::Create), 1);
    assert_eq!(api.count(ApiOp::Update), 1);
    assert_eq!(stack.resource_id("r"), Some(id.clone()));
    assert_eq!(api.peek("firewall_rule", &id).unwrap().properties["action"], json!("allow"));
    assert_eq!(stack.node("r").unwrap().status, ResourceStatus::UpdateComplete);
    Ok(())
}

#[tokio::test]
async fn teardown_deletes_dependents_first() -> TestResult {
    init_tracing();

    let api = Arc::new(InMemoryNetworkApi::new().with_settle_polls(2));
    let mut stack = StackBuilder::new("demo")
        .with_api(api.clone())
        .rule("r", json!({}))
        .policy("p", &["r"])
        .firewall("fw", "p")
        .build();
    let targets = stack.targets();
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    let teardown = stack.teardown_targets();
    let report = with_timeout(converge(&mut stack, &teardown, &fast_options())).await?;

    assert_eq!(report.succeeded, vec!["fw".to_string(), "p".to_string(), "r".to_string()]);
    assert_eq!(delete_order(&api), vec!["firewall", "firewall_policy", "firewall_rule"]);
    assert!(api.is_empty());
    assert!(stack.nodes().all(|n| n.resource_id.is_none()));
    Ok(())
}

#[tokio::test]
async fn deleting_an_already_missing_resource_succeeds() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({}));
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    let id = stack.resource_id("r").unwrap();
    assert!(api.forget("firewall_rule", &id));

    let teardown = stack.teardown_targets();
    let report = with_timeout(converge(&mut stack, &teardown, &fast_options())).await?;
    assert_eq!(report.succeeded, vec!["r".to_string()]);
    assert_eq!(stack.node("r").unwrap().status, ResourceStatus::DeleteComplete);
    Ok(())
}

#[tokio::test]
async fn retryable_errors_are_retried_up_to_the_policy() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({}));
    let api = builder.api();
    api.inject(fail_create("demo-r", 503, Some(2)));
    let mut stack = builder.build();
    let targets = stack.targets();

    let options = EngineOptions {
        retry: RetryPolicy::new(3),
        ..fast_options()
    };
    with_timeout(converge(&mut stack, &targets, &options)).await?;
    assert_eq!(api.count(ApiOp::Create), 3);
    assert!(stack.resource_id("r").is_some());
    Ok(())
}

#[tokio::test]
async fn retries_exhausted_fail_the_node() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({}));
    let api = builder.api();
    api.inject(fail_create("demo-r", 503, None));
    let mut stack = builder.build();
    let targets = stack.targets();

    let options = EngineOptions {
        retry: RetryPolicy::new(1),
        ..fast_options()
    };
    let err = with_timeout(converge(&mut stack, &targets, &options))
        .await
        .unwrap_err();
    let StackdagError::ConvergenceFailed(failure) = err else {
        panic!("expected ConvergenceFailed");
    };
    assert!(matches!(failure.failures[0].error, TaskError::OperationFailed(_)));
    assert_eq!(api.count(ApiOp::Create), 2);
    Ok(())
}

#[tokio::test]
async fn slow_create_times_out() -> TestResult {
    init_tracing();

    let api = Arc::new(InMemoryNetworkApi::new().with_settle_polls(100_000));
    let mut stack = StackBuilder::new("demo")
        .with_api(api)
        .rule("r", json!({}))
        .build();
    let targets = stack.targets();

    let mut options = fast_options();
    options.runner.timeout = Some(Duration::from_millis(30));

    let err = with_timeout(converge(&mut stack, &targets, &options))
        .await
        .unwrap_err();
    let StackdagError::ConvergenceFailed(failure) = err else {
        panic!("expected ConvergenceFailed");
    };
    assert!(matches!(failure.failures[0].error, TaskError::Timeout { .. }));
    Ok(())
}

#[tokio::test]
async fn refresh_then_converge_recreates_vanished_resource() -> TestResult {
    init_tracing();

    let builder = StackBuilder::new("demo").rule("r", json!({})).policy("p", &["r"]);
    let api = builder.api();
    let mut stack = builder.build();
    let targets = stack.targets();
    with_timeout(converge(&mut stack, &targets, &fast_options())).await?;

    let old_rule = stack.resource_id("r").unwrap();
    api.forget("firewall_rule", &old_rule);
    assert_eq!(stack.refresh()?, vec!["r".to_string()]);

    let report = with_timeout(converge(&mut stack, &targets, &fast_options())).await?;
    assert_eq!(report.succeeded, vec!["r".to_string(), "p".to_string()]);
    assert_eq!(api.count(ApiOp::Create), 3);
    assert_eq!(api.count(ApiOp::Update), 1);

    let new_rule = stack.resource_id("r").unwrap();
    assert_ne!(new_rule, old_rule);
    let policy = api.peek("firewall_policy", &stack.resource_id("p").unwrap()).unwrap();
    assert_eq!(policy.properties["firewall_rules"], json!([new_rule]));
    Ok(())
}
