// tests/property_scheduler.rs

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;
use stackdag::dag::{NodeRunState, Operation, Plan, Scheduler, SchedulerOptions};
use stackdag::task::TaskError;
use stackdag::types::FailurePolicy;

fn name(i: usize) -> String {
    format!("n{i:02}")
}

// Random plan over up to `max_nodes` nodes. Acyclic because node N only
// waits on nodes 0..N-1 that also have work in the run.
fn plan_strategy(max_nodes: usize) -> impl Strategy<Value = Plan> {
    (1..=max_nodes).prop_flat_map(|n| {
        (
            proptest::collection::vec(any::<bool>(), n),
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n),
        )
            .prop_map(move |(active, raw_waits)| {
                let mut operations = BTreeMap::new();
                let mut waits_on = BTreeMap::new();

                for (i, potential) in raw_waits.into_iter().enumerate() {
                    let op = if active[i] {
                        Operation::Create
                    } else {
                        Operation::NoOp
                    };
                    operations.insert(name(i), op);
                    if op == Operation::NoOp {
                        continue;
                    }

                    let mut waits: Vec<String> = potential
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|d| d % i)
                        .filter(|d| active[*d])
                        .collect::<HashSet<_>>()
                        .into_iter()
                        .map(name)
                        .collect();
                    waits.sort();
                    waits_on.insert(name(i), waits);
                }
                Plan::from_parts(operations, waits_on)
            })
    })
}

proptest! {
    #[test]
    fn scheduler_respects_waits_and_terminates(
        plan in plan_strategy(10),
        failing in proptest::collection::hash_set(0..10usize, 0..4),
        max_in_flight in 1..4usize,
        stop_all in any::<bool>(),
    ) {
        let failing: HashSet<String> = failing.into_iter().map(name).collect();
        let active: Vec<String> = plan.active().map(|(n, _)| n.to_string()).collect();
        let options = SchedulerOptions {
            max_in_flight,
            failure_policy: if stop_all { FailurePolicy::StopAll } else { FailurePolicy::SkipDependents },
        };
        let mut scheduler = Scheduler::new(plan.clone(), options, 1);

        let mut executing: Vec<String> = Vec::new();
        let mut started: HashSet<String> = HashSet::new();

        let step = scheduler.start();
        for op in step.newly_scheduled {
            prop_assert!(scheduler.deps_satisfied(&op.node));
            prop_assert!(started.insert(op.node.clone()), "{} started twice", op.node);
            executing.push(op.node);
        }
        prop_assert!(scheduler.in_flight() <= max_in_flight);

        let mut steps = 0;
        while !executing.is_empty() && steps < 1000 {
            steps += 1;
            let node = executing.remove(0);
            let result = if failing.contains(&node) {
                Err(TaskError::ResourceFailed(format!("{node} failed")))
            } else {
                Ok(())
            };

            let step = scheduler.handle_completion(&node, result);
            for op in step.newly_scheduled {
                for w in plan.waits_on(&op.node) {
                    prop_assert_eq!(scheduler.run_state_of(w), Some(NodeRunState::Succeeded));
                }
                prop_assert!(started.insert(op.node.clone()), "{} started twice", op.node);
                executing.push(op.node);
            }
            prop_assert!(scheduler.in_flight() <= max_in_flight);
            prop_assert_eq!(scheduler.in_flight(), executing.len());
        }

        prop_assert!(steps < 1000, "simulation did not terminate");
        prop_assert!(scheduler.is_finished());

        let report = scheduler.report();
        for node in &active {
            let state = scheduler.run_state_of(node);
            prop_assert!(state.is_some_and(|s| s.is_terminal()), "{} not terminal: {:?}", node, state);

            match state {
                Some(NodeRunState::Skipped) => {
                    prop_assert!(!started.contains(node));
                    if !stop_all {
                        prop_assert!(
                            plan.waits_on(node)
                                .iter()
                                .any(|w| scheduler.run_state_of(w) != Some(NodeRunState::Succeeded)),
                            "{} skipped although all waits succeeded", node
                        );
                    }
                }
                Some(NodeRunState::Succeeded) => prop_assert!(!failing.contains(node)),
                Some(NodeRunState::Failed) => prop_assert!(failing.contains(node)),
                other => prop_assert!(false, "unexpected state {:?} for {}", other, node),
            }
        }

        prop_assert!(report.cancelled.is_empty());
        prop_assert_eq!(
            report.succeeded.len() + report.failed.len() + report.skipped.len(),
            active.len()
        );
        prop_assert_eq!(report.succeeded.len() + report.failed.len(), started.len());
    }
}
