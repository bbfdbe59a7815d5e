use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use support_agents::fixtures::demo_environment;
use support_agents::{logging, Orchestrator, OrchestratorConfig, ProcessRequest};
use tracing::info;
use triage::Channel;

#[derive(Parser)]
#[command(name = "support-agents", about = "Run support tickets through the triage pipeline")]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the three sample conversations against in-memory handlers.
    Demo,
    /// Process a single message.
    Process {
        #[arg(long)]
        user_id: String,
        /// Generated when omitted.
        #[arg(long)]
        ticket_id: Option<String>,
        #[arg(long, default_value = "chat")]
        channel: String,
        message: String,
    },
}

const DEMO_CASES: [(&str, &str, &str); 3] = [
    ("demo-1", "user-001", "How do I reset my password?"),
    ("demo-2", "user-001", "What is my subscription status?"),
    ("demo-3", "user-002", "I was charged twice for my subscription and need a refund"),
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs)?;

    let config = OrchestratorConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let env = demo_environment();
    let orchestrator = Orchestrator::new(env.collaborators.clone(), config);

    let requests: Vec<ProcessRequest> = match cli.command {
        Command::Demo => DEMO_CASES
            .iter()
            .map(|(ticket_id, user_id, message)| ProcessRequest::new(*ticket_id, *user_id, *message))
            .collect(),
        Command::Process {
            user_id,
            ticket_id,
            channel,
            message,
        } => {
            let channel: Channel = channel.parse().context("Invalid --channel")?;
            let ticket_id = ticket_id.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
            vec![ProcessRequest::new(ticket_id, user_id, message).with_channel(channel)]
        }
    };

    for request in requests {
        info!(ticket_id = %request.ticket_id, message = %request.user_message, "Processing");
        let outcome = orchestrator
            .process(request)
            .await
            .context("Ticket rejected")?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    info!(
        escalations = env.escalations.records().len(),
        stored = env.store.records().len(),
        "Done"
    );
    Ok(())
}
