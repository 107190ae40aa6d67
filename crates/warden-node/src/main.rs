//! Warden Node - access-control operator tool.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use warden_access::{Identity, RoleLevel};
use warden_node::{init_logging, Assignment, LogFormat, Node, NodeConfig};

/// Warden Node - role resolution, supervisor assignment and drift audits
#[derive(Parser, Debug)]
#[command(name = "warden-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON snapshot of the document store
    #[arg(short, long, default_value = "warden-snapshot.json")]
    snapshot: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration
    ValidateConfig,
    /// Print the effective role of an identity
    Resolve {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Check an identity against a required role
    Check {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Required role (employee, supervisor, admin, system_admin)
        #[arg(long)]
        required: RoleLevel,
    },
    /// Promote a user to supervisor of the given departments
    Promote {
        #[arg(long)]
        user: String,
        /// Comma-separated department ids
        #[arg(long, value_delimiter = ',', required = true)]
        departments: Vec<String>,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Demote a supervisor to employee
    Demote {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Promote a user to admin
    PromoteAdmin {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Demote an admin to employee
    DemoteAdmin {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Audit supervisor records for drift
    Audit {
        /// Repair stale directories and orphaned memberships
        #[arg(long)]
        repair: bool,
    },
    /// Run scheduled audits and store heartbeats until interrupted
    Watch,
}

#[derive(clap::Args, Debug)]
struct IdentityArgs {
    /// User id
    #[arg(long)]
    user: String,
    /// Email address
    #[arg(long)]
    email: String,
    /// Treat the email as verified
    #[arg(long)]
    verified: bool,
}

impl IdentityArgs {
    fn identity(&self) -> Identity {
        let identity = Identity::new(&self.user, &self.email);
        if self.verified {
            identity.verified()
        } else {
            identity
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }
    init_logging(&config.log_level, config.log_format);

    tracing::info!(version = warden_access::VERSION, "starting warden node");

    if let Command::ValidateConfig = args.command {
        println!(
            "configuration ok: {} system admin(s), {} department(s), timeouts {:?}/{:?}",
            config.access.system_admins.len(),
            config.access.departments.len(),
            config.access.doc_timeout(),
            config.access.total_timeout(),
        );
        return Ok(());
    }

    let node = Node::open(config, &args.snapshot)?;
    match args.command {
        Command::ValidateConfig => {}
        Command::Resolve { identity } => {
            print_json(&node.resolve(&identity.identity()).await?)?;
        }
        Command::Check { identity, required } => {
            let decision = node.check(&identity.identity(), required).await?;
            print_json(&decision)?;
            if !decision.is_allowed() {
                std::process::exit(1);
            }
        }
        Command::Promote {
            user,
            departments,
            actor,
        } => {
            let departments: BTreeSet<String> = departments.into_iter().collect();
            let assignment = Assignment::Promote {
                user_id: user,
                departments,
            };
            run_assignment(&node, &actor, &assignment).await?;
        }
        Command::Demote { user, actor } => {
            run_assignment(&node, &actor, &Assignment::Demote { user_id: user }).await?;
        }
        Command::PromoteAdmin { user, actor } => {
            run_assignment(&node, &actor, &Assignment::PromoteAdmin { user_id: user }).await?;
        }
        Command::DemoteAdmin { user, actor } => {
            run_assignment(&node, &actor, &Assignment::DemoteAdmin { user_id: user }).await?;
        }
        Command::Audit { repair } => {
            print_json(&node.audit(repair).await?)?;
        }
        Command::Watch => {
            tracing::info!("press Ctrl+C to stop");
            node.watch(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
            })
            .await?;
        }
    }

    Ok(())
}

async fn run_assignment(node: &Node, actor: &str, assignment: &Assignment) -> Result<()> {
    let report = node.assign(actor, assignment).await?;
    print_json(&report)?;
    if !report.is_complete() {
        bail!("{}", report);
    }
    Ok(())
}
