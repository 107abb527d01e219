//! plategridd — the PlateGrid lab runner.
//!
//! Loads a lab description (devices, robots, handoffs, worklists) from
//! TOML, wires it into the plate and robot schedulers and runs every
//! worklist to completion. Also queries remote device nodes.
//!
//! # Usage
//!
//! ```text
//! plategridd run --config lab.toml
//! plategridd check --config lab.toml
//! plategridd node --url http://127.0.0.1:2000 --action seal --args '{"temp": 170}'
//! ```

mod lab;
mod runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use plategrid_devices::{NodeActionRequest, NodeClient, RestNodeClient};
use plategrid_planner::PathPlanner;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::lab::LabConfig;
use crate::runner::LabRunner;

#[derive(Parser)]
#[command(name = "plategridd", about = "PlateGrid lab runner")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every worklist of a lab until done or interrupted.
    Run {
        /// Lab description file.
        #[arg(long, default_value = "lab.toml")]
        config: PathBuf,
    },

    /// Validate a lab description and report its transport graph.
    Check {
        /// Lab description file.
        #[arg(long, default_value = "lab.toml")]
        config: PathBuf,
    },

    /// Query a remote device node.
    Node {
        /// Base URL of the node, e.g. http://127.0.0.1:2000.
        #[arg(long)]
        url: String,

        /// Action to call synchronously after the health check.
        #[arg(long)]
        action: Option<String>,

        /// JSON object passed as the action's arguments.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Check { config } => check(&config),
        Command::Node { url, action, args } => node(&url, action.as_deref(), &args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,plategrid=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = LabConfig::from_file(path)?;
    info!(path = %path.display(), "PlateGrid lab starting");

    // ── Build the lab ──────────────────────────────────────────
    let lab = config.build()?;
    let mut planner = PathPlanner::new(Arc::clone(&lab.devices));
    planner.create_world();

    // ── Start schedulers ───────────────────────────────────────
    let mut runner = LabRunner::start(lab, &config.scheduler)?;

    // ── Wait for worklists or Ctrl-C ───────────────────────────
    let interrupted = tokio::select! {
        _ = runner.wait() => false,
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            true
        }
    };
    if interrupted {
        warn!(outstanding = runner.outstanding(), "interrupted");
    } else {
        info!("all worklists complete");
    }

    println!("{}", runner.report());
    runner.stop().await?;
    info!("PlateGrid lab stopped");
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = LabConfig::from_file(path)?;
    let lab = config.build()?;

    let mut planner = PathPlanner::new(Arc::clone(&lab.devices));
    planner.create_world();
    let disconnected = planner.disconnected_places();

    println!(
        "{}: {} devices, {} robots, {} handoffs, {} worklists",
        path.display(),
        config.devices.len(),
        config.robots.len(),
        config.handoffs.len(),
        config.worklists.len()
    );
    println!(
        "transport graph: {} places, {} connections",
        planner.place_count(),
        planner.connection_count()
    );
    if !disconnected.is_empty() {
        println!("unreachable places:");
        for place in &disconnected {
            println!("\t{place}");
        }
    }
    Ok(())
}

async fn node(url: &str, action: Option<&str>, args: &str) -> anyhow::Result<()> {
    let client = RestNodeClient::new(url)?;

    if !client.health().await {
        anyhow::bail!("node {url} is not healthy");
    }
    let definition = client.get_definition().await?;
    println!("{}", serde_json::to_string_pretty(&definition)?);

    let Some(action) = action else {
        return Ok(());
    };
    if definition.action(action).is_none() {
        warn!(%action, node = %definition.name, "action not advertised by node");
    }
    let args: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    let mut request = NodeActionRequest::new(action);
    request.args = args;

    let response = client.call_action(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        anyhow::bail!(
            "action {action} failed: {}",
            response.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}
