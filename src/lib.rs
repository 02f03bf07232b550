// src/lib.rs

pub mod api;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod policy;
pub mod resource;
pub mod task;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{InMemoryNetworkApi, NetworkApi};
use crate::cli::CliArgs;
use crate::config::{config_root_dir, load_and_validate, ConfigFile};
use crate::dag::{ConvergenceReport, Plan, Stack, Targets};
use crate::engine::{converge_with, plan_for, EngineEvent, EngineOptions};
use crate::exec::TaskExecutor;
use crate::policy::{parse_rule, Enforcer, PolicyLocation, RequestContext, Target};

/// Policy action checked before a stack is converged.
pub const ACTION_CREATE_STACK: &str = "CreateStack";
/// Policy action checked before a stack is torn down.
pub const ACTION_DELETE_STACK: &str = "DeleteStack";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - stack file loading
/// - policy enforcement for the caller given on the command line
/// - planning (dry run) or convergence against the in-memory network API
/// - optional teardown
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let context = request_context(&args);
    if let Some(enforcer) = policy_enforcer(&cfg, &config_path) {
        let target = policy_target(&cfg, &context);
        enforcer.enforce(&context, ACTION_CREATE_STACK, &target)?;
        if args.destroy {
            enforcer.enforce(&context, ACTION_DELETE_STACK, &target)?;
        }
        debug!(roles = ?context.roles, "policy checks passed");
    }

    let api: Arc<dyn NetworkApi> = Arc::new(InMemoryNetworkApi::new());
    let mut stack = Stack::from_config(&cfg, api)?;

    if args.dry_run {
        let targets = stack.targets();
        let plan = plan_for(&mut stack, &targets)?;
        print_dry_run(&cfg, &stack, &plan)?;
        return Ok(());
    }

    let targets = stack.targets();
    let report = converge_until_interrupted(&mut stack, &targets, &cfg.engine).await?;
    print_report(&stack, "converge", &report);

    if args.destroy {
        let teardown = stack.teardown_targets();
        let report = converge_until_interrupted(&mut stack, &teardown, &cfg.engine).await?;
        print_report(&stack, "destroy", &report);
    }

    Ok(())
}

/// Converge with the production executor; Ctrl-C cancels the run.
async fn converge_until_interrupted(
    stack: &mut Stack,
    targets: &Targets,
    options: &EngineOptions,
) -> errors::Result<ConvergenceReport> {
    let (rt_tx, rt_rx) = mpsc::channel::<EngineEvent>(64);
    let executor = TaskExecutor::new(rt_tx.clone(), options.runner, options.retry);

    let ctrl_c = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C; convergence cannot be interrupted");
            return;
        }
        info!("Ctrl+C received; cancelling convergence");
        request_shutdown(&rt_tx).await;
    });

    let result = converge_with(stack, targets, options.scheduler, executor, rt_rx).await;
    ctrl_c.abort();
    result
}

/// Ask the runtime to stop. Returns false when it is already gone.
async fn request_shutdown(tx: &mpsc::Sender<EngineEvent>) -> bool {
    let sent = tx.send(EngineEvent::ShutdownRequested).await.is_ok();
    if !sent {
        warn!("convergence already finished; shutdown request dropped");
    }
    sent
}

fn request_context(args: &CliArgs) -> RequestContext {
    let mut context = RequestContext::new().with_roles(args.roles.iter().cloned());
    if let Some(user) = &args.user {
        context = context.with_user(user.clone());
    }
    if let Some(tenant) = &args.tenant {
        context = context.with_tenant(tenant.clone());
    }
    context
}

/// `None` when the stack file has no `[policy]` section.
fn policy_enforcer(cfg: &ConfigFile, config_path: &Path) -> Option<Enforcer> {
    let section = cfg.policy.as_ref()?;
    let config_dir = if section.config_dir.is_absolute() {
        section.config_dir.clone()
    } else {
        config_root_dir(config_path).join(&section.config_dir)
    };

    let location = PolicyLocation::new(config_dir, section.project.clone(), section.policy_file.clone());
    let mut enforcer =
        Enforcer::from_location(location).with_default_rule(parse_rule(&section.default_rule));
    if let Some(scope) = &section.scope {
        enforcer = enforcer.with_scope(scope.clone());
    }
    Some(enforcer)
}

fn policy_target(cfg: &ConfigFile, context: &RequestContext) -> Target {
    let mut target = Target::new();
    target.insert("stack_name".to_string(), cfg.stack.name.clone());
    if let Some(tenant) = &context.tenant_id {
        target.insert("tenant_id".to_string(), tenant.clone());
    }
    target
}

/// Print the stack and the operations a run would perform, dependencies
/// first.
fn print_dry_run(cfg: &ConfigFile, stack: &Stack, plan: &Plan) -> errors::Result<()> {
    println!("stackdag dry-run");
    println!("  stack = {}", stack.name());
    println!("  engine.max_in_flight = {}", cfg.engine.scheduler.max_in_flight);
    println!("  engine.on_failure = {:?}", cfg.engine.scheduler.failure_policy);
    println!("  engine.max_retries = {}", cfg.engine.retry.max_retries);
    if let Some(policy) = &cfg.policy {
        println!("  policy.file = {}", policy.policy_file.display());
    }
    println!();

    let order = stack.graph().topological_order()?;
    println!("resources ({}):", order.len());
    for name in &order {
        let Some(node) = stack.node(name) else {
            continue;
        };
        println!("  - {name} ({})", node.type_name());
        println!("      operation: {}", plan.operation(name));
        let deps = stack.graph().dependencies_of(name);
        if !deps.is_empty() {
            println!("      requires: {:?}", deps);
        }
        let waits = plan.waits_on(name);
        if !waits.is_empty() {
            println!("      waits on: {:?}", waits);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_report(stack: &Stack, phase: &str, report: &ConvergenceReport) {
    println!(
        "{phase} of stack '{}' complete (run {}): {} operation(s) succeeded",
        stack.name(),
        report.run_id,
        report.succeeded.len()
    );
    for name in &report.succeeded {
        let id = stack.resource_id(name).unwrap_or_else(|| "-".to_string());
        let status = stack
            .node(name)
            .map(|n| n.status.to_string())
            .unwrap_or_default();
        println!("  - {name}: {status} ({id})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_request_reports_closed_runtime() {
        let (tx, mut rx) = mpsc::channel::<EngineEvent>(1);
        assert!(request_shutdown(&tx).await);
        assert!(matches!(rx.recv().await, Some(EngineEvent::ShutdownRequested)));

        drop(rx);
        assert!(!request_shutdown(&tx).await);
    }
}
