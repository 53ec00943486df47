//! Demo entry point: compiles a small flow, plans its deployment, and either
//! starts it as local processes or prints a JSON manifest per pod.

use clap::Parser;
use flow_core::compiler::FlowCompiler;
use flow_core::config::FlowConfig;
use flow_deploy::config::DeployConfig;
use flow_deploy::planner::DeploymentPlanner;
use flow_deploy::runner::local::LocalRunner;
use flow_deploy::runner::manifest::{render_all, JsonManifestRenderer};

#[derive(Parser, Debug)]
struct Cli {
    /// Print the manifest instead of spawning local processes.
    #[arg(long)]
    manifest_only: bool,

    /// Executable used as each pod's local-process runtime stand-in.
    #[arg(long, default_value = "true")]
    runtime_bin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut flow = FlowCompiler::new(FlowConfig::default());
    flow.add("encoder", None)?;
    flow.add("ranker", None)?;
    let graph = flow.compile()?;

    let plans = DeploymentPlanner::new(&graph, DeployConfig::default()).plan()?;

    if cli.manifest_only {
        for manifest in render_all(&plans, &JsonManifestRenderer)? {
            println!("{}", manifest.rendered);
        }
        return Ok(());
    }

    let runner = LocalRunner::new(DeployConfig::default(), cli.runtime_bin);
    runner.start_all(&plans).await?;
    tracing::info!("all pods started, waiting for shutdown signal");
    runner.run_until_signal().await?;
    Ok(())
}
