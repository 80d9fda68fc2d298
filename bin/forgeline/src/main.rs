//! forgeline deploys a manifest of interdependent contract modules, recording
//! each produced address in a shared config store.

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use forgeline_deploy::{
    ExternalInputs, HardhatArtifacts, JsonRpcClient, Manifest, OrchestratorBuilder, PlannedStep,
    RunLock, RunReport,
};

fn print_report(report: &RunReport) {
    for unit in &report.units {
        println!("{:<24} {} ({:?})", unit.unit, unit.address, unit.status);
        for entry in &unit.actions.entries {
            println!("    {:<40} {:?}", entry.label, entry.status);
        }
        if !unit.actions.entries.is_empty() {
            println!(
                "    {} completed, {} already applied",
                unit.actions.completed().count(),
                unit.actions.skipped().count()
            );
        }
    }
    for fallback in &report.fallbacks {
        println!(
            "warning: {} used its fallback gas limit {} ({})",
            fallback.unit, fallback.fallback, fallback.reason
        );
    }
    for conflict in &report.conflicts {
        println!(
            "warning: {} already holds {}; {} was not written",
            conflict.key, conflict.existing, conflict.attempted
        );
    }
    for partial in &report.partial {
        println!("partial: {partial}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut manifest = Manifest::load_from_file(&cli.manifest)?;
    if let Command::Deploy { halt_on_partial: true } = cli.command {
        manifest.policy.halt_on_partial = true;
    }

    let mut externals = ExternalInputs::from_env();
    for (key, value) in &cli.inputs {
        externals.insert(key, value);
    }

    let client = JsonRpcClient::new(cli.rpc_url.clone(), cli.from)?;
    let artifacts = HardhatArtifacts::new(manifest.store.artifacts.clone());
    tracing::info!(
        rpc_url = %client.url(),
        deployer = %cli.from,
        artifacts = %artifacts.root().display(),
        "Endpoint and artifacts configured"
    );

    match cli.command {
        Command::Plan => {
            let orchestrator = OrchestratorBuilder::new(client, artifacts)
                .manifest(&manifest)
                .externals(externals)
                .build()?;
            let plan = orchestrator.plan(&manifest.units)?;

            for step in &plan.steps {
                match step {
                    PlannedStep::Deploy { unit, output_key } => {
                        println!("deploy  {unit:<24} -> {output_key}")
                    }
                    PlannedStep::AlreadyDeployed { unit, address } => {
                        println!("skip    {unit:<24} (at {address})")
                    }
                }
            }
            for invalid in &plan.invalid {
                println!("invalid: {invalid}");
            }
            if !plan.invalid.is_empty() {
                anyhow::bail!("{} unit(s) have invalid inputs", plan.invalid.len());
            }
        }
        Command::Deploy { .. } => {
            let _lock = RunLock::acquire(&manifest.store.path)?;
            let mut orchestrator = OrchestratorBuilder::new(client, artifacts)
                .manifest(&manifest)
                .externals(externals)
                .build()?;

            match orchestrator.run(&manifest.units).await {
                Ok(report) => {
                    print_report(&report);
                    if !report.is_fully_wired() {
                        tracing::warn!(
                            units = report.partial.len(),
                            "Some units are deployed but not fully wired; re-run to resume"
                        );
                    }
                }
                Err(e) => {
                    print_report(&e.completed);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
