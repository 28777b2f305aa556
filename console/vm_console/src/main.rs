//! vmctl - drive VM lifecycle workflows from the terminal

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use colored::*;
use log::{info, debug};
use vm_console::{Action, Config, ConsolePresenter, MonitorContext, MonitorError, RequestId};

#[derive(Parser)]
#[command(name = "vmctl")]
#[command(about = "Trigger VM workflows and follow their status", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "vmctl.toml")]
    config: PathBuf,

    /// Print every field of delivered status rows
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch a lifecycle action and wait for its terminal status
    Run {
        /// e.g. create_vm, hibernate_vm, restore_vm, stop_simulation
        action: Action,

        /// Correlation id; a new one is generated when omitted
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Follow a request dispatched elsewhere until it finishes
    Watch {
        action: Action,
        request_id: String,
    },
    /// Read the current status row once
    Status {
        request_id: String,
    },
    /// Ask the backend for a VM's state
    CheckVm {
        vm_name: String,
    },
    /// List the volumes of a project
    Volumes {
        project_id: String,
    },
    /// Validate a project and show its name
    Project {
        project_id: String,
    },
    /// Show credit usage for a request
    Credits {
        request_id: String,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}: {}", args.config.display(), e);
            process::exit(1);
        }
    };
    config.apply_env();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    ).init();
    debug!("Using automation backend {}", config.api_base_url());

    let sink = Arc::new(ConsolePresenter::new(args.verbose));
    let context = MonitorContext::from_config(&config, sink);

    let result = execute(&context, args.command).await;

    for info in context.shutdown().await {
        println!("{} {} for request {} was cancelled", "!".yellow().bold(), info.action, info.request_id);
    }

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn execute(context: &MonitorContext<vm_console::RealtimeFeed>, command: Command) -> Result<(), MonitorError> {
    match command {
        Command::Run { action, request_id } => {
            let request_id = match request_id {
                Some(raw) => RequestId::parse(raw)?,
                None => RequestId::generate(),
            };

            info!("Running {} as request {}", action, request_id);
            println!("{} {} (request {})", "→".cyan(), action.label().bold(), request_id);

            tokio::select! {
                outcome = context.run(action, &request_id) => {
                    outcome?;
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("{}", "Interrupted.".yellow());
                    return Err(MonitorError::Cancelled);
                }
            }
        },
        Command::Watch { action, request_id } => {
            let request_id = RequestId::parse(request_id)?;
            let operation = context.watch(action, &request_id).await?;

            tokio::select! {
                outcome = operation.wait() => {
                    outcome?;
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("{}", "Interrupted.".yellow());
                    return Err(MonitorError::Cancelled);
                }
            }
        },
        Command::Status { request_id } => {
            let request_id = RequestId::parse(request_id)?;
            match context.poll_status(&request_id).await? {
                Some(payload) => {
                    let status = payload.status().unwrap_or("unknown");
                    println!("{}: {}", request_id, status_engine::status_label(status).bold());
                    if let Some(message) = payload.error_message.as_deref().filter(|m| !m.is_empty()) {
                        println!("    {}", message.red());
                    }
                },
                None => println!("No status recorded for request {}", request_id),
            }
        },
        Command::CheckVm { vm_name } => {
            let status = context.dispatcher().check_vm_status(&vm_name).await?;
            let state = status.status().unwrap_or("unknown");
            println!("{}: {}", vm_name.bold(), status_engine::status_label(state));
            if let Some(ip) = status.user_vm_ip.as_deref() {
                println!("    IP: {}", ip);
            }
        },
        Command::Volumes { project_id } => {
            let volumes = context.dispatcher().list_volumes(&project_id).await?;
            if volumes.is_empty() {
                println!("No volumes in project {}", project_id);
            }
            for volume in volumes {
                let size = volume.volume_size_gb
                    .map(|gb| format!("{} GB", gb))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<20} {:>10} {}",
                    volume.volume_id,
                    volume.volume_name,
                    size,
                    volume.volume_state.as_deref().unwrap_or("unknown").dimmed(),
                );
            }
        },
        Command::Project { project_id } => {
            let check = context.dispatcher().check_project(&project_id).await?;
            let name = context.dispatcher().get_project_name(&project_id).await?;
            println!("{} ({})", name.bold(), project_id);
            if check.out_of_credits {
                println!("{}", "Project is out of credits.".red());
            }
        },
        Command::Credits { request_id } => {
            let request_id = RequestId::parse(request_id)?;
            let data = context.dispatcher().show_credits(&request_id).await?;
            println!("{}", serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string()));
        },
    }

    Ok(())
}
