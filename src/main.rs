use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use steprunner::config::{AppConfig, LoggingConfig};
use steprunner::engine::{RunStatus, StepStatus, Submission};

#[derive(Parser)]
#[command(
    name = "steprunner",
    about = "Scripted browser-interaction runner with pollable status and structured logs",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Bind address (overrides [server].bind)
        #[arg(long, env = "STEPRUNNER_BIND")]
        bind: Option<String>,
    },

    /// Execute one run from a JSON file and print its results
    Run {
        /// File holding `{ "testName": ..., "steps": [...] }` or a bare steps array
        #[arg(long)]
        file: PathBuf,

        /// Run name when the file holds a bare steps array
        #[arg(long)]
        name: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    CheckConfig,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_submission(path: &Path, name: Option<String>) -> Result<Submission> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read steps file: {}", path.display()))?;
    let mut body: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse steps file: {}", path.display()))?;

    if body.is_array() {
        let name = name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "run".to_string())
        });
        body = json!({ "testName": name, "steps": body });
    } else if let (Some(name), Some(object)) = (name, body.as_object_mut()) {
        object.insert("testName".to_string(), Value::String(name));
    }

    Ok(Submission::from_json(&body)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting steprunner");
            steprunner::serve(config).await?;
        }
        Commands::Run { file, name, json } => {
            let submission = read_submission(&file, name)?;
            let engine = steprunner::build_engine(&config)?;
            let id = engine.submit(&submission.name, submission.steps).await?;
            engine.execute(&id).await;

            let snapshot = engine
                .results(&id)
                .await
                .with_context(|| format!("run {} vanished", id))?;

            if json {
                let logs = engine.logs().list(&id).await;
                let output = json!({ "results": snapshot, "logs": logs });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("\nRun {} ({})", snapshot.name, snapshot.id);
                println!("{:<4} | {:<10} | {:<8} | Error", "#", "Command", "Status");
                println!("{:-<4}-|-{:-<10}-|-{:-<8}-|-{:-<40}", "", "", "", "");
                for (index, step) in snapshot.steps.iter().enumerate() {
                    let status_str = match step.status {
                        StepStatus::Pending => "PENDING",
                        StepStatus::Running => "RUNNING",
                        StepStatus::Success => "OK",
                        StepStatus::Failed => "FAILED",
                    };
                    println!(
                        "{:<4} | {:<10} | {:<8} | {}",
                        index + 1,
                        step.command,
                        status_str,
                        step.error.as_deref().unwrap_or("")
                    );
                }
                println!("\nStatus: {}\n", snapshot.status);
                println!("{}", engine.logs().export(&id).await);
            }

            if snapshot.status != RunStatus::Success {
                anyhow::bail!("run {} finished with status {}", id, snapshot.status);
            }
        }
        Commands::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
