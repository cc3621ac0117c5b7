//! DeskPilot command line.
//!
//! ```bash
//! deskpilot run "open Calculator and compute 12*4"
//! deskpilot repl
//! deskpilot history --limit 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use deskpilot_lib::agent_engine::engine::AgentEngine;
use deskpilot_lib::agent_engine::event_bus::{EventBus, StatusEvent, StatusKind};
use deskpilot_lib::agent_engine::state::TerminalOutcome;
use deskpilot_lib::config::{load_config, load_config_from, AppConfig};
use deskpilot_lib::errors::{DeskPilotError, DeskPilotResult};
use deskpilot_lib::{build_desktop_engine, init_tracing, open_task_history};

#[derive(Parser)]
#[command(name = "deskpilot")]
#[command(version)]
#[command(about = "Natural-language desktop automation")]
struct Args {
    /// Path to config.toml (default: next to the executable, then the working directory)
    #[arg(short, long, global = true, env = "DESKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Print status events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task and exit
    Run {
        /// Task in plain English
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,
    },
    /// Read tasks line by line; follow-up tasks see earlier ones
    Repl,
    /// Show recorded tasks (requires [history] task_history_file)
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn load(path: Option<&PathBuf>) -> DeskPilotResult<AppConfig> {
    match path {
        Some(p) => load_config_from(p),
        None => load_config().or_else(|e| {
            tracing::warn!("{e}; using built-in defaults");
            Ok(AppConfig::default())
        }),
    }
}

fn print_event(event: &StatusEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event.kind {
        StatusKind::Step => println!("── {}", event.content),
        StatusKind::Thinking => println!("   … {}", event.content),
        StatusKind::Action => println!("   → {}", event.content),
        StatusKind::Error => eprintln!("✗ {}", event.content),
        StatusKind::Completion => {
            let mark = if event.success.unwrap_or(false) { "✓" } else { "✗" };
            println!("{mark} {}", event.content);
        }
    }
}

/// Prints until every sender is gone.
fn spawn_printer(events: &EventBus, json: bool) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event, json),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "status printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Ctrl+C raises the stop flag; the loop ends at its next iteration.
fn spawn_ctrl_c(engine: &AgentEngine) {
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping current task");
            stop.request_stop();
        }
    });
}

fn report(outcome: &TerminalOutcome) {
    tracing::info!(
        task_id = %outcome.task_id,
        state = outcome.final_state(),
        steps = outcome.steps,
        "{}",
        outcome.summary
    );
}

#[tokio::main]
async fn main() -> DeskPilotResult<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();
    let config = load(args.config.as_ref())?;

    match args.command {
        Commands::History { limit } => {
            if config.history.task_history_file.is_none() {
                return Err(DeskPilotError::Config(
                    "task history is not persisted; set [history] task_history_file".into(),
                ));
            }
            let history = open_task_history(&config.history)?;
            println!("{}", history.render(limit));
        }
        Commands::Run { task } => {
            let events = EventBus::new();
            let history = Arc::new(open_task_history(&config.history)?);
            let engine = build_desktop_engine(&config, history, events.clone())?;
            let printer = spawn_printer(&events, args.json);
            spawn_ctrl_c(&engine);

            let outcome = engine.execute_task(&task.join(" ")).await;
            report(&outcome);
            drop(engine);
            drop(events);
            let _ = printer.await;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Repl => {
            let events = EventBus::new();
            let history = Arc::new(open_task_history(&config.history)?);
            let engine = build_desktop_engine(&config, history, events.clone())?;
            spawn_printer(&events, args.json);
            spawn_ctrl_c(&engine);

            println!("DeskPilot ready. Type a task, or \"exit\" to quit.");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let task = line.trim();
                match task {
                    "" => continue,
                    "exit" | "quit" => break,
                    _ => {
                        let outcome = engine.execute_task(task).await;
                        report(&outcome);
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }
    Ok(())
}
