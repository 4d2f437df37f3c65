use anyhow::{Context, Result};
use conveyor::artifact::MemoryArtifactStore;
use conveyor::cli::commands::{RunCommand, ValidateCommand};
use conveyor::cli::output::*;
use conveyor::cli::{Cli, Command};
use conveyor::collab::CollaboratorRegistry;
use conveyor::core::config::PipelineConfig;
use conveyor::core::{ExecutionStatus, RunContext};
use conveyor::execution::{
    ExecutionEngine, ExecutionEvent, RunOptions, SchedulingStrategy, StepRunner,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.clone()).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, cli: Cli) -> Result<()> {
    let config = match PipelineConfig::from_file(&cmd.definition) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Invalid pipeline definition:", CROSS);
            println!("  {}", style(&e).red());
            std::process::exit(2);
        }
    };

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let secrets: HashMap<String, String> = cmd.secret.iter().cloned().collect();
    if let Err(e) = config.check_secrets(&secrets) {
        println!("{} {}", CROSS, style(&e).red());
        std::process::exit(2);
    }

    let mut vars = config.env.clone();
    for (key, value) in &cmd.var {
        vars.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut pipeline = config.to_pipeline();
    let mut ctx = RunContext::new(vars, secrets);

    let registry = Arc::new(CollaboratorRegistry::from_config(&config.collaborators));
    let store = Arc::new(MemoryArtifactStore::new(pipeline.transitive_needs()));
    let engine = ExecutionEngine::new(
        StepRunner::new(registry),
        SchedulingStrategy::from(cmd.strategy),
        store,
    );

    // Console output via the engine's event stream; the bar advances as
    // stages reach a terminal state
    let progress = create_progress_bar(pipeline.stages.len());
    progress.set_message(config.name.clone());
    let stream = cli.stream;
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::StepOutput { output, .. } = &event {
            if stream {
                bar.println(format_output(output, 5));
            }
            return;
        }
        bar.println(format_execution_event(&event));
        if matches!(
            event,
            ExecutionEvent::StageSucceeded { .. }
                | ExecutionEvent::StageFailed { .. }
                | ExecutionEvent::StageSkipped { .. }
        ) {
            bar.inc(1);
        }
    });

    let options = RunOptions {
        run_teardown: cmd.teardown,
        deadline: cmd.deadline_secs.map(Duration::from_secs),
    };

    println!();
    let status = engine.execute(&mut pipeline, &mut ctx, &options).await;
    progress.finish_and_clear();

    print_run_summary(&pipeline);

    if let (Some(started), Some(completed)) =
        (pipeline.state.started_at, pipeline.state.completed_at)
    {
        if let Ok(duration) = completed.signed_duration_since(started).to_std() {
            println!("\n{} Duration: {}", INFO, style(format_duration(duration)).dim());
        }
    }

    match status {
        ExecutionStatus::Succeeded => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        _ => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(status)
            );
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.definition) {
        Ok(config) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!(
                "  Steps: {}",
                style(config.stages.iter().map(|s| s.steps.len()).sum::<usize>()).cyan()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(&e).red());
            std::process::exit(2);
        }
    }
}
