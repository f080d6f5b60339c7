//! Capacity Orchestrator CLI
//!
//! A command-line tool for routing requests, inspecting agent health and
//! incidents, and querying the predictive capacity engine.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{agents, health, predict, route};
use output::OutputFormat;

/// Capacity Orchestrator CLI
#[derive(Parser)]
#[command(name = "orchctl")]
#[command(author, version, about = "CLI for the Capacity Orchestrator", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via ORCH_API_URL env var)
    #[arg(long, env = "ORCH_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route a request to the best matching agent
    Route {
        /// Action name, e.g. predict_los
        action: String,

        /// JSON payload
        #[arg(long, short)]
        payload: Option<String>,

        /// Preferred agent, used when it is registered and healthy
        #[arg(long)]
        prefer: Option<String>,

        /// Dispatch timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Classify only, without dispatching
        #[arg(long)]
        dry_run: bool,
    },

    /// Agent health checks and recovery
    #[command(subcommand)]
    Health(HealthCommands),

    /// Predictive capacity queries
    #[command(subcommand)]
    Predict(PredictCommands),

    /// List or deregister agents
    Agents {
        #[command(subcommand)]
        command: Option<AgentCommands>,
    },

    /// Show open and recently resolved incidents
    Incidents {
        /// Resolved incidents to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum HealthCommands {
    /// Poll every registered agent now
    CheckAll,

    /// Poll one agent now
    CheckOne {
        /// Agent name
        agent: String,
    },

    /// Show 24h uptime, latency and open incidents
    Status,

    /// Ask an agent to recover, then re-probe it
    Recover {
        /// Agent name
        agent: String,
    },
}

#[derive(Subcommand)]
pub enum PredictCommands {
    /// Predict length of stay for a diagnosis category
    Los {
        /// Diagnosis category, e.g. sepsis
        category: String,

        /// Interval width in standard deviations
        #[arg(long)]
        sigma: Option<f64>,
    },

    /// Forecast hourly census for a unit
    Forecast {
        /// Unit ID
        unit: String,

        /// Forecast horizon in hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Show surge level for a facility or all units
    Surge {
        /// Facility ID (all units when omitted)
        #[arg(long)]
        facility: Option<String>,
    },

    /// Rank available beds for a patient
    Placement {
        /// Facility ID
        #[arg(long)]
        facility: Option<String>,

        /// Capability the bed must have (repeatable)
        #[arg(long)]
        require: Vec<String>,

        /// Capability the bed should have (repeatable)
        #[arg(long)]
        prefer: Vec<String>,

        /// Maximum recommendations
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List registered agents
    List,

    /// Deregister an agent
    Remove {
        /// Agent name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let format = cli
        .format
        .or_else(|| config.default_format.as_deref().and_then(OutputFormat::parse))
        .unwrap_or_default();

    if cli.verbose {
        output::print_info(&format!("Using API at {}", api_url));
    }

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Route {
            action,
            payload,
            prefer,
            timeout_ms,
            dry_run,
        } => {
            let args = route::RouteArgs {
                action,
                payload,
                prefer,
                timeout_ms,
            };
            if dry_run {
                route::classify(&client, args, format).await?;
            } else {
                route::route(&client, args, format).await?;
            }
        }
        Commands::Health(health_cmd) => match health_cmd {
            HealthCommands::CheckAll => health::check_all(&client, format).await?,
            HealthCommands::CheckOne { agent } => health::check_one(&client, &agent, format).await?,
            HealthCommands::Status => health::status(&client, format).await?,
            HealthCommands::Recover { agent } => health::recover(&client, &agent, format).await?,
        },
        Commands::Predict(predict_cmd) => match predict_cmd {
            PredictCommands::Los { category, sigma } => {
                predict::los(&client, category, sigma, format).await?;
            }
            PredictCommands::Forecast { unit, hours } => {
                predict::forecast(&client, unit, hours, format).await?;
            }
            PredictCommands::Surge { facility } => {
                predict::surge(&client, facility, format).await?;
            }
            PredictCommands::Placement {
                facility,
                require,
                prefer,
                limit,
            } => {
                let args = predict::PlacementArgs {
                    facility_id: facility,
                    require,
                    prefer,
                    limit,
                };
                predict::placement(&client, args, format).await?;
            }
        },
        Commands::Agents { command } => match command.unwrap_or(AgentCommands::List) {
            AgentCommands::List => agents::list(&client, format).await?,
            AgentCommands::Remove { name } => agents::remove(&client, &name, format).await?,
        },
        Commands::Incidents { limit } => {
            agents::incidents(&client, limit, format).await?;
        }
    }

    Ok(())
}
