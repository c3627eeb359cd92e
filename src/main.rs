use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use breakdown_core::config::AppConfig;
use breakdown_core::event::{EventBus, WorkflowEvent};
use breakdown_core::state::TaskState;

use breakdown_agent::{Orchestrator, Pattern, Services};
use breakdown_memory::{embedder_from_config, SqliteMemoryStore};

#[derive(Parser)]
#[command(name = "breakdown", version, about = "Break a task into subtasks, run agents, merge the results")]
struct Cli {
    /// The task to break down
    #[arg(required_unless_present = "show_info")]
    task: Option<String>,

    /// Coordination pattern (overrides the config file)
    #[arg(short, long, value_parser = parse_pattern)]
    pattern: Option<Pattern>,

    /// Print the pattern table
    #[arg(short = 'i', long)]
    show_info: bool,

    /// Print the step trace and context sizes
    #[arg(short, long)]
    verbose: bool,

    /// Use the memory-enhanced variant (sequential patterns only)
    #[arg(long)]
    memory: bool,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,

    /// Path to config file
    #[arg(short, long, default_value = "breakdown.toml")]
    config: PathBuf,
}

fn parse_pattern(s: &str) -> Result<Pattern, String> {
    s.parse::<Pattern>().map_err(|_| {
        let names: Vec<&str> = Pattern::ALL.iter().map(|p| p.as_str()).collect();
        format!("expected one of: {}", names.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("breakdown=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.show_info {
        print_pattern_table();
    }
    let Some(task) = cli.task.clone() else {
        return Ok(());
    };

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(pattern) = cli.pattern {
        config.orchestrator.pattern = pattern.to_string();
    }
    if cli.memory {
        config.orchestrator.memory_enhanced = true;
    }

    let embedder = embedder_from_config(config.embedding.as_ref());
    let store = match config.memory_db_path() {
        Some(path) => {
            info!(path = %path.display(), "Opening memory store");
            SqliteMemoryStore::open(&path, embedder)?
        }
        None => SqliteMemoryStore::in_memory(embedder)?,
    };
    let completion = breakdown_llm::create_retrying(&config.model, &config.fallback_models);
    let services = Services::new(Arc::new(completion)).with_memory_store(Arc::new(store));

    let bus = Arc::new(EventBus::default());
    let printer = cli.verbose.then(|| {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(n)) => eprintln!("  ... {} events dropped", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let orchestrator = Orchestrator::from_config(&config, services)?.with_events(bus.clone());
    let info = orchestrator.pattern_info();
    println!("Pattern: {} ({})", info.name, orchestrator.pattern());
    println!("Task: {}\n", task);

    let outcome = orchestrator.run(TaskState::new(task)).await;

    // Closing the bus ends the printer
    drop(orchestrator);
    drop(bus);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let result = outcome?;
    let state = &result.state;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!("Subtasks:");
    for (i, subtask) in state.subtasks.iter().enumerate() {
        println!("  {}. {}", i + 1, subtask);
    }
    println!();

    if state.is_merged() {
        println!("Final result:\n{}", state.final_result);
    } else {
        warn!("Run finished without a merged result");
        println!("No final result was produced.");
    }

    if cli.verbose {
        println!();
        println!("Final step: {}", state.step);
        println!("Steps run: {}", result.step_records.len());
        println!("Context length: {}", state.context.len());
        println!("Compressed context length: {}", state.compressed_context.len());
        println!("Elapsed: {} ms", result.total_elapsed_ms);
    }

    Ok(())
}

fn print_pattern_table() {
    println!("Available patterns:\n");
    for pattern in Pattern::ALL {
        let info = pattern.info();
        println!("{} - {}", pattern, info.name);
        println!("  Description:  {}", info.description);
        println!("  Memory:       {}", info.memory);
        println!("  Coordination: {}", info.coordination);
        println!("  Reliability:  {}", info.reliability);
        println!();
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::RunStarted { pattern, .. } => eprintln!("> run started ({})", pattern),
        WorkflowEvent::StepStarted { step, branch } => eprintln!("  [{}] {} ...", branch, step),
        WorkflowEvent::StepCompleted { step, branch, elapsed_ms } => {
            eprintln!("  [{}] {} done in {} ms", branch, step, elapsed_ms)
        }
        WorkflowEvent::StepFailed { step, branch, error } => {
            eprintln!("  [{}] {} failed: {}", branch, step, error)
        }
        WorkflowEvent::BranchEnded { step, branch } => eprintln!("  [{}] branch ended at {}", branch, step),
        WorkflowEvent::RunCompleted { merged, elapsed_ms } => {
            eprintln!("> run completed in {} ms (merged: {})", elapsed_ms, merged)
        }
    }
}
