// crates/flowruntime/tests/engine_test.rs

use flowcore::{
    ConfigurationError, EventBus, EventName, ExecutionError, ExecutionEvent, FlowError, RunState,
    Step, StepContext, StepDefinition, StepError, StepId, Trigger, TriggerSource, Value,
};
use flowruntime::{Flow, FlowExecutor, FlowRun, RunStatus, StepRegistry};
use flowsteps::{router_fn, step_fn, DelayStep, ThresholdRouter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Step that appends its name to the "trail" array
fn mark(name: &'static str) -> impl Step {
    step_fn(name, move |ctx: StepContext| async move {
        let mut state = ctx.state.write().await;
        let mut trail = match state.get("trail") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        trail.push(Value::from(name));
        state.set("trail", trail)?;
        Ok::<(), StepError>(())
    })
}

fn trail(state: &RunState) -> Vec<String> {
    match state.get("trail") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// s0 routes on "score" to "approved" (sA) or "rejected" (sB)
fn approval_flow() -> Flow {
    let mut registry = StepRegistry::new("approval");
    registry
        .register(
            StepDefinition::start(
                "s0",
                ThresholdRouter::new("score", 50.0, "approved", "rejected"),
            )
            .router(["approved", "rejected"]),
        )
        .unwrap();
    registry
        .register(StepDefinition::listen("sA", Trigger::on_event("approved"), mark("sA")))
        .unwrap();
    registry
        .register(StepDefinition::listen("sB", Trigger::on_event("rejected"), mark("sB")))
        .unwrap();
    registry.seal().unwrap()
}

async fn run_flow(
    flow: &Flow,
    state: RunState,
) -> (FlowRun, Result<flowruntime::ExecutionResult, FlowError>) {
    let executor = FlowExecutor::new(10);
    let bus = EventBus::new(100);
    let mut run = FlowRun::new(flow.clone(), state);
    let result = executor.execute(&mut run, &bus).await;
    (run, result)
}

#[tokio::test]
async fn test_router_takes_exactly_one_branch() {
    init_tracing();
    let flow = approval_flow();

    let (run, result) = run_flow(&flow, RunState::new().with_field("score", 90)).await;
    let result = result.unwrap();
    assert_eq!(run.status(), RunStatus::Completed);
    assert!(result.has_completed("sA"));
    assert!(!result.has_completed("sB"));
    assert_eq!(trail(&result.state), vec!["sA"]);
    assert_eq!(result.route_of("s0"), Some(&EventName::from("approved")));
    assert_eq!(result.fired, vec![EventName::from("approved")]);

    let (run, result) = run_flow(&flow, RunState::new().with_field("score", 10)).await;
    let result = result.unwrap();
    assert_eq!(run.status(), RunStatus::Completed);
    assert!(result.has_completed("sB"));
    assert!(!result.has_completed("sA"));
    assert_eq!(trail(&result.state), vec!["sB"]);
}

#[tokio::test]
async fn test_untaken_branch_is_a_warning_not_a_failure() {
    let flow = approval_flow();
    let (_, result) = run_flow(&flow, RunState::new().with_field("score", 90)).await;
    let result = result.unwrap();

    let warning = result.warning.expect("untaken branch should be reported");
    assert_eq!(warning.steps, vec![StepId::from("sB")]);
    assert_eq!(warning.to_string(), "steps never executed: sB");
}

#[tokio::test]
async fn test_any_listener_fires_once() {
    init_tracing();
    let flow = StepRegistry::new("fan-in")
        .step(StepDefinition::start("s0", mark("s0")))
        .and_then(|r| r.step(StepDefinition::listen("a", Trigger::after("s0"), mark("a"))))
        .and_then(|r| r.step(StepDefinition::listen("b", Trigger::after("s0"), mark("b"))))
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "join",
                Trigger::any([
                    TriggerSource::Step("a".into()),
                    TriggerSource::Step("b".into()),
                ]),
                mark("join"),
            ))
        })
        .and_then(StepRegistry::seal)
        .unwrap();

    let (_, result) = run_flow(&flow, RunState::new()).await;
    let result = result.unwrap();

    let trail = trail(&result.state);
    assert_eq!(trail.iter().filter(|s| s.as_str() == "join").count(), 1);
    assert_eq!(trail.len(), 4);
    assert_eq!(result.completed.len(), 4);
    assert!(result.warning.is_none());
}

#[tokio::test]
async fn test_all_listener_waits_for_every_source() {
    let flow = StepRegistry::new("fan-in-all")
        .step(StepDefinition::start("s0", mark("s0")))
        .and_then(|r| r.step(StepDefinition::listen("fast", Trigger::after("s0"), mark("fast"))))
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "slow",
                Trigger::after("s0"),
                step_fn("slow", |ctx: StepContext| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let mut state = ctx.state.write().await;
                    let mut trail = match state.get("trail") {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                    trail.push(Value::from("slow"));
                    state.set("trail", trail)?;
                    Ok::<(), StepError>(())
                }),
            ))
        })
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "join",
                Trigger::all([
                    TriggerSource::Step("fast".into()),
                    TriggerSource::Step("slow".into()),
                ]),
                mark("join"),
            ))
        })
        .and_then(StepRegistry::seal)
        .unwrap();

    let (_, result) = run_flow(&flow, RunState::new()).await;
    let result = result.unwrap();
    assert_eq!(trail(&result.state), vec!["s0", "fast", "slow", "join"]);
}

#[tokio::test]
async fn test_router_completion_counts_for_all_triggers() {
    let flow = StepRegistry::new("router-completes")
        .step(
            StepDefinition::start("s0", ThresholdRouter::new("score", 50.0, "approved", "rejected"))
                .router(["approved", "rejected"]),
        )
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "audit",
                Trigger::all([
                    TriggerSource::Step("s0".into()),
                    TriggerSource::Event("approved".into()),
                ]),
                mark("audit"),
            ))
        })
        .and_then(|r| r.step(StepDefinition::listen("always", Trigger::after("s0"), mark("always"))))
        .and_then(StepRegistry::seal)
        .unwrap();

    let (_, result) = run_flow(&flow, RunState::new().with_field("score", 75)).await;
    let result = result.unwrap();
    assert!(result.has_completed("audit"));
    assert!(result.has_completed("always"));

    let (_, result) = run_flow(&flow, RunState::new().with_field("score", 5)).await;
    let result = result.unwrap();
    assert!(!result.has_completed("audit"));
    assert!(result.has_completed("always"));
}

#[tokio::test]
async fn test_state_written_upstream_is_visible_downstream() {
    let flow = StepRegistry::new("visibility")
        .step(StepDefinition::start(
            "greet",
            step_fn("greet", |ctx: StepContext| async move {
                ctx.set("greeting", "hello").await
            }),
        ))
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "echo",
                Trigger::after("greet"),
                step_fn("echo", |ctx: StepContext| async move {
                    let greeting = ctx.require("greeting").await?;
                    let greeting = greeting.as_str().unwrap_or_default().to_string();
                    ctx.set("echo", format!("{} world", greeting)).await
                }),
            ))
        })
        .and_then(StepRegistry::seal)
        .unwrap();

    let (_, result) = run_flow(&flow, RunState::new()).await;
    let result = result.unwrap();
    assert_eq!(result.state.get("echo"), Some(&Value::from("hello world")));
    assert!(result.rounds <= flow.len());
}

#[tokio::test]
async fn test_rounds_are_bounded_by_step_count() {
    let flow = approval_flow();
    let (_, result) = run_flow(&flow, RunState::new().with_field("score", 60)).await;
    let result = result.unwrap();
    assert!(result.rounds <= flow.len());
    assert_eq!(result.rounds, 2);
}

#[tokio::test]
async fn test_failing_step_fails_the_run() {
    init_tracing();
    let flow = StepRegistry::new("failing")
        .step(StepDefinition::start("s0", mark("s0")))
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "boom",
                Trigger::after("s0"),
                step_fn("boom", |_ctx: StepContext| async move {
                    Err::<(), StepError>(StepError::failed("agent unavailable"))
                }),
            ))
        })
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "slow",
                Trigger::after("s0"),
                DelayStep::from_millis(200).then_set("slow_done", true),
            ))
        })
        .and_then(|r| r.step(StepDefinition::listen("after", Trigger::after("boom"), mark("after"))))
        .and_then(StepRegistry::seal)
        .unwrap();

    let (run, result) = run_flow(&flow, RunState::new()).await;
    let err = result.unwrap_err();

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(err.step_id(), Some(&StepId::from("boom")));
    match err {
        FlowError::Execution(ExecutionError { step_id, cause }) => {
            assert_eq!(step_id.as_str(), "boom");
            assert!(matches!(cause, StepError::ExecutionFailed(ref m) if m == "agent unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The in-flight sibling is cancelled and nothing downstream runs
    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = run.state().snapshot().await;
    assert!(state.get("slow_done").is_none());
    assert_eq!(trail(&state), vec!["s0"]);
}

#[tokio::test]
async fn test_undeclared_outcome_aborts_the_run() {
    let flow = StepRegistry::new("typo")
        .step(
            StepDefinition::start(
                "s0",
                router_fn("s0", |_ctx: StepContext| async move {
                    Ok::<_, StepError>(EventName::from("aproved"))
                }),
            )
            .router(["approved", "rejected"]),
        )
        .and_then(|r| r.step(StepDefinition::listen("sA", Trigger::on_event("approved"), mark("sA"))))
        .and_then(StepRegistry::seal)
        .unwrap();

    let (run, result) = run_flow(&flow, RunState::new()).await;
    assert_eq!(run.status(), RunStatus::Failed);
    match result.unwrap_err() {
        FlowError::Configuration(ConfigurationError::UndeclaredOutcome { step, outcome }) => {
            assert_eq!(step.as_str(), "s0");
            assert_eq!(outcome.as_str(), "aproved");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_run_cannot_be_reused() {
    let flow = approval_flow();
    let executor = FlowExecutor::default();
    let bus = EventBus::default();
    let mut run = FlowRun::new(flow, RunState::new().with_field("score", 90));

    executor.execute(&mut run, &bus).await.unwrap();
    let err = executor.execute(&mut run, &bus).await.unwrap_err();
    assert!(matches!(err, FlowError::InvalidRunState(_)));
    assert_eq!(run.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let flow = StepRegistry::new("slow")
        .step(StepDefinition::start("wait", DelayStep::new(Duration::from_secs(30))))
        .and_then(|r| r.step(StepDefinition::listen("after", Trigger::after("wait"), mark("after"))))
        .and_then(StepRegistry::seal)
        .unwrap();

    let executor = FlowExecutor::default();
    let bus = EventBus::default();
    let mut run = FlowRun::new(flow, RunState::new());
    let token = run.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = executor.execute(&mut run, &bus).await.unwrap_err();
    assert!(matches!(err, FlowError::Cancelled));
    assert_eq!(run.status(), RunStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_before_start_schedules_nothing() {
    let flow = approval_flow();
    let executor = FlowExecutor::default();
    let bus = EventBus::default();
    let mut events = bus.subscribe();

    let mut run = FlowRun::new(flow, RunState::new().with_field("score", 90));
    run.cancel();
    let err = executor.execute(&mut run, &bus).await.unwrap_err();
    assert!(matches!(err, FlowError::Cancelled));

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ExecutionEvent::StepStarted { .. }));
    }
}

#[tokio::test]
async fn test_deadline_fails_slow_runs() {
    let flow = StepRegistry::new("slow")
        .step(StepDefinition::start("wait", DelayStep::new(Duration::from_secs(30))))
        .and_then(StepRegistry::seal)
        .unwrap();

    let executor = FlowExecutor::default();
    let bus = EventBus::default();
    let mut run = FlowRun::new(flow, RunState::new()).with_deadline(Duration::from_millis(50));

    let err = executor.execute(&mut run, &bus).await.unwrap_err();
    assert!(matches!(err, FlowError::DeadlineExceeded { millis: 50 }));
    assert_eq!(run.status(), RunStatus::Failed);
}

#[tokio::test]
async fn test_independent_listeners_run_concurrently() {
    // Both listeners block until the other one has started
    let barrier = Arc::new(Barrier::new(2));
    let left = barrier.clone();
    let right = barrier.clone();

    let flow = StepRegistry::new("parallel")
        .step(StepDefinition::start("s0", mark("s0")))
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "left",
                Trigger::after("s0"),
                step_fn("left", move |ctx: StepContext| {
                    let barrier = left.clone();
                    async move {
                        barrier.wait().await;
                        ctx.set("left", true).await
                    }
                }),
            ))
        })
        .and_then(|r| {
            r.step(StepDefinition::listen(
                "right",
                Trigger::after("s0"),
                step_fn("right", move |ctx: StepContext| {
                    let barrier = right.clone();
                    async move {
                        barrier.wait().await;
                        ctx.set("right", true).await
                    }
                }),
            ))
        })
        .and_then(StepRegistry::seal)
        .unwrap();

    let executor = FlowExecutor::new(4);
    let bus = EventBus::default();
    let mut run = FlowRun::new(flow, RunState::new()).with_deadline(Duration::from_secs(5));
    let result = executor.execute(&mut run, &bus).await.unwrap();

    assert_eq!(result.state.get("left"), Some(&Value::Bool(true)));
    assert_eq!(result.state.get("right"), Some(&Value::Bool(true)));
}

/// Step tracking how many steps of the run are in flight at once
fn occupancy(name: &'static str) -> impl Step {
    step_fn(name, |ctx: StepContext| async move {
        {
            let mut state = ctx.state.write().await;
            let now = state.get("in_flight").and_then(Value::as_f64).unwrap_or(0.0) + 1.0;
            let peak = state.get("peak").and_then(Value::as_f64).unwrap_or(0.0);
            state.set("in_flight", now)?;
            state.set("peak", now.max(peak))?;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut state = ctx.state.write().await;
        let now = state.get("in_flight").and_then(Value::as_f64).unwrap_or(1.0) - 1.0;
        state.set("in_flight", now)?;
        Ok::<(), StepError>(())
    })
}

fn fan_out_flow() -> Flow {
    StepRegistry::new("fan-out")
        .step(StepDefinition::start("s0", mark("s0")))
        .and_then(|r| r.step(StepDefinition::listen("a", Trigger::after("s0"), occupancy("a"))))
        .and_then(|r| r.step(StepDefinition::listen("b", Trigger::after("s0"), occupancy("b"))))
        .and_then(|r| r.step(StepDefinition::listen("c", Trigger::after("s0"), occupancy("c"))))
        .and_then(StepRegistry::seal)
        .unwrap()
}

#[tokio::test]
async fn test_max_parallel_limits_in_flight_steps() {
    let bus = EventBus::default();

    let mut run = FlowRun::new(fan_out_flow(), RunState::new());
    let result = FlowExecutor::new(1).execute(&mut run, &bus).await.unwrap();
    assert_eq!(result.state.get("peak"), Some(&Value::Number(1.0)));
    assert_eq!(result.completed.len(), 4);

    let mut run = FlowRun::new(fan_out_flow(), RunState::new());
    let result = FlowExecutor::new(8).execute(&mut run, &bus).await.unwrap();
    assert_eq!(result.state.get("peak"), Some(&Value::Number(3.0)));
    assert_eq!(result.state.get("in_flight"), Some(&Value::Number(0.0)));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let flow = StepRegistry::new("copy")
        .step(StepDefinition::start(
            "copy",
            step_fn("copy", |ctx: StepContext| async move {
                let input = ctx.require("input").await?;
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.set("output", input).await
            }),
        ))
        .and_then(StepRegistry::seal)
        .unwrap();

    let executor = FlowExecutor::default();
    let bus = EventBus::default();
    let mut run_x = FlowRun::new(flow.clone(), RunState::new().with_field("input", "X"));
    let mut run_y = FlowRun::new(flow.clone(), RunState::new().with_field("input", "Y"));

    let (x, y) = tokio::join!(
        executor.execute(&mut run_x, &bus),
        executor.execute(&mut run_y, &bus)
    );
    let (x, y) = (x.unwrap(), y.unwrap());

    assert_ne!(x.run_id, y.run_id);
    assert_eq!(x.state.get("output"), Some(&Value::from("X")));
    assert_eq!(y.state.get("output"), Some(&Value::from("Y")));
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let flow = approval_flow();
    let executor = FlowExecutor::default();
    let bus = EventBus::new(100);
    let mut events = bus.subscribe();

    let mut run = FlowRun::new(flow, RunState::new().with_field("score", 90));
    let run_id = run.id();
    executor.execute(&mut run, &bus).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id(), run_id);
        received.push(event);
    }

    assert!(matches!(received.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(matches!(
        received.last(),
        Some(ExecutionEvent::RunCompleted { success: true, .. })
    ));
    assert!(received.iter().any(|e| matches!(
        e,
        ExecutionEvent::EventFired { event, emitted_by, .. }
            if event.as_str() == "approved" && emitted_by.as_str() == "s0"
    )));
    assert!(received.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepsNotExecuted { steps, .. } if steps == &vec![StepId::from("sB")]
    )));
    let started = received
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepStarted { .. }))
        .count();
    assert_eq!(started, 2);
}
