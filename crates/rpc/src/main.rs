//! Aura CLI - Main entry point

use aura_ledger::Actor;
use aura_rpc::{commands, AppConfig, AppContext};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "aura")]
#[command(about = "Aura - Agent permission authorization core", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger database url (overrides config and AURA_DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit ledger operations
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Policy tooling (nothing is stored)
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Decide one agent request and record the decision
    Verify {
        /// Org ID
        #[arg(long)]
        org: Uuid,
        /// Agent ID
        #[arg(long)]
        agent: Uuid,
        /// Request context as JSON
        #[arg(long, default_value = "")]
        context: String,
        /// Policy document to activate for the org first
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Engine of the policy document (defaults to the configured engine)
        #[arg(long)]
        engine: Option<String>,
        /// Input the policy must allow before it is activated (JSON)
        #[arg(long)]
        simulate: Option<String>,
    },

    /// Run a TCP bus relay
    Relay {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7070")]
        listen: String,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Append an entry to an org's chain
    Append {
        #[arg(long)]
        org: Uuid,
        /// Event type
        #[arg(long)]
        event_type: String,
        /// Payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Acting user
        #[arg(long)]
        user: Option<Uuid>,
        /// Acting agent
        #[arg(long)]
        agent: Option<Uuid>,
    },

    /// Verify an org's hash chain
    Verify {
        #[arg(long)]
        org: Uuid,
        /// Maximum entries to replay
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show recent entries
    Log {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Compile a policy document
    Check {
        /// Policy document (JSON)
        file: PathBuf,
        #[arg(long)]
        engine: Option<String>,
    },

    /// Evaluate a policy document against an input
    Eval {
        /// Policy document (JSON)
        file: PathBuf,
        /// Input as JSON
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        engine: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aura=info")),
        )
        .init();

    let cli = Cli::parse();

    // The relay needs no ledger or policy state
    if let Commands::Relay { listen } = &cli.command {
        return commands::relay(listen).await;
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    let default_engine = config.policy.default_engine.clone();

    let ctx = AppContext::new(config).await?;
    let mut exit_code = 0;

    let result = match cli.command {
        Commands::Audit { command } => match command {
            AuditCommands::Append {
                org,
                event_type,
                payload,
                user,
                agent,
            } => {
                let payload = commands::parse_json(&payload)?;
                let actor = Actor { user, agent };
                commands::audit_append(&ctx, org, &event_type, &payload, actor).await
            }
            AuditCommands::Verify { org, limit } => {
                commands::audit_verify(&ctx, org, limit).await.map(|broken_at| {
                    if broken_at != 0 {
                        exit_code = 2;
                    }
                })
            }
            AuditCommands::Log { org, limit } => commands::audit_log(&ctx, org, limit).await,
        },

        Commands::Policy { command } => match command {
            PolicyCommands::Check { file, engine } => {
                let document = commands::read_document(&file)?;
                let engine = engine.unwrap_or(default_engine);
                commands::policy_check(&ctx, &engine, &document)
            }
            PolicyCommands::Eval {
                file,
                input,
                engine,
            } => {
                let document = commands::read_document(&file)?;
                let input = commands::parse_json(&input)?;
                let engine = engine.unwrap_or(default_engine);
                commands::policy_eval(&ctx, &engine, &document, &input)
            }
        },

        Commands::Verify {
            org,
            agent,
            context,
            policy,
            engine,
            simulate,
        } => {
            let context = commands::parse_json(&context)?;
            let simulation = simulate.as_deref().map(commands::parse_json).transpose()?;
            let engine = engine.unwrap_or(default_engine);
            let document = policy.map(|path| commands::read_document(&path)).transpose()?;
            commands::verify(
                &ctx,
                org,
                agent,
                context,
                document.map(|doc| (engine.as_str(), doc)),
                simulation.as_ref(),
            )
            .await
        }

        Commands::Relay { .. } => Ok(()),
    };

    ctx.shutdown().await?;
    result?;

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
