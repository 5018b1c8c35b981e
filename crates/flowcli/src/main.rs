// crates/flowcli/src/main.rs

mod demo;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, StepEvent, Value};
use flowruntime::{Flow, FlowRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a bundled flow
    Run {
        /// Name of the flow to run
        #[arg(short, long, default_value = demo::LEAD_QUALIFICATION)]
        flow: String,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Steps allowed to run at the same time
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Fail the run after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Validate a flow and print its summary
    Validate {
        #[arg(short, long, default_value = demo::LEAD_QUALIFICATION)]
        flow: String,
    },

    /// List the steps of a flow
    Steps {
        #[arg(short, long, default_value = demo::LEAD_QUALIFICATION)]
        flow: String,
    },

    /// Render a flow as Graphviz DOT
    Plot {
        #[arg(short, long, default_value = demo::LEAD_QUALIFICATION)]
        flow: String,

        /// Output file path, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}

fn load_flow(name: &str) -> Result<Flow> {
    let flow = demo::build(name).ok_or_else(|| {
        anyhow!(
            "Unknown flow '{}'. Available flows: {}",
            name,
            demo::names().join(", ")
        )
    })??;
    Ok(flow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            flow,
            input,
            verbose,
            max_parallel,
            deadline_ms,
        } => {
            init_logging(verbose);

            let mut config = RuntimeConfig::default();
            if let Some(max_parallel) = max_parallel {
                config.max_parallel_steps = max_parallel;
            }
            config.run_deadline_ms = deadline_ms;

            run_flow(&flow, input, config).await?;
        }

        Commands::Validate { flow } => {
            init_logging(false);
            validate_flow(&flow)?;
        }

        Commands::Steps { flow } => {
            list_steps(&flow)?;
        }

        Commands::Plot { flow, output } => {
            plot_flow(&flow, output)?;
        }
    }

    Ok(())
}

fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input_str) = input else {
        return Ok(HashMap::new());
    };

    match serde_json::from_str(&input_str)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        _ => Err(anyhow!("Input must be a JSON object")),
    }
}

async fn run_flow(name: &str, input: Option<String>, config: RuntimeConfig) -> Result<()> {
    let flow = load_flow(name)?;
    let inputs = parse_inputs(input)?;

    println!("🚀 Running flow: {}", flow.name());
    println!("   Steps: {}", flow.len());
    println!();

    tracing::debug!("Runtime config: {:?}", config);
    let runtime = FlowRuntime::with_config(config);
    runtime.register_flow(flow).await;

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { .. } => {
                    println!("▶️  Run started");
                }
                ExecutionEvent::StepStarted { step_id, .. } => {
                    println!("  ⚡ Starting step: {}", step_id);
                }
                ExecutionEvent::StepCompleted {
                    step_id,
                    route,
                    duration_ms,
                    ..
                } => match route {
                    Some(route) => println!(
                        "  ✅ Step {} completed in {}ms, routed to '{}'",
                        step_id, duration_ms, route
                    ),
                    None => println!("  ✅ Step {} completed in {}ms", step_id, duration_ms),
                },
                ExecutionEvent::StepFailed { step_id, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step_id, error);
                }
                ExecutionEvent::EventFired { event, emitted_by, .. } => {
                    println!("  🔀 {} fired '{}'", emitted_by, event);
                }
                ExecutionEvent::StepsNotExecuted { steps, .. } => {
                    let names: Vec<String> = steps.iter().map(ToString::to_string).collect();
                    println!("  💤 Never executed: {}", names.join(", "));
                }
                ExecutionEvent::StepEvent { step_id, event, .. } => match event {
                    StepEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", step_id, message);
                    }
                    StepEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", step_id, message);
                    }
                    StepEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", step_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", step_id, percent);
                        }
                    }
                },
                ExecutionEvent::RunCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let outcome = runtime.kickoff(name, inputs).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = outcome?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", result.run_id);
    println!("   Completed: {} steps in {} rounds", result.completed.len(), result.rounds);
    for (step, route) in &result.routes {
        println!("   Route: {} -> {}", step, route);
    }
    if let Some(warning) = &result.warning {
        println!("   Note: {}", warning);
    }

    println!();
    println!("📤 Final state:");
    let mut fields: Vec<_> = result.state.fields().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in fields {
        println!("   {}: {}", key, value.to_json());
    }

    Ok(())
}

fn validate_flow(name: &str) -> Result<()> {
    println!("🔍 Validating flow: {}", name);

    let flow = load_flow(name)?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name());
    if let Some(description) = flow.description() {
        println!("   Description: {}", description);
    }
    println!("   Steps: {}", flow.len());
    println!("   Start: {}", flow.start_step());
    let routers = flow.steps().filter(|s| s.is_router()).count();
    println!("   Routers: {}", routers);
    if flow.has_cycles() {
        println!("   ⚠️  Contains cycles; each step still runs at most once");
    }

    Ok(())
}

fn list_steps(name: &str) -> Result<()> {
    let flow = load_flow(name)?;

    println!("📦 Steps of {}:", flow.name());
    println!();

    for step in flow.steps() {
        println!("  • {} [{}] {}", step.id, step.kind(), step.work.name());
        println!("    trigger: {}", step.trigger);
        let outcomes: Vec<String> = step.routing.outcomes().map(ToString::to_string).collect();
        if !outcomes.is_empty() {
            println!("    outcomes: {}", outcomes.join(", "));
        }
        if let Some(description) = &step.description {
            println!("    {}", description);
        }
    }

    Ok(())
}

fn plot_flow(name: &str, output: Option<PathBuf>) -> Result<()> {
    let flow = load_flow(name)?;
    let dot = flow.to_dot();

    match output {
        Some(path) => {
            std::fs::write(&path, dot)?;
            println!("✨ Wrote {} to {}", flow.name(), path.display());
            println!();
            println!("Render it with:");
            println!("  dot -Tpng {} -o {}.png", path.display(), flow.name());
        }
        None => print!("{}", dot),
    }

    Ok(())
}
