use std::path::PathBuf;

use clap::Parser;
use geoloc_test_shared::{Scenario, last_known, prelude::*, replay};
use log::info;

#[derive(Parser)]
struct Cli {
    /// Path to a JSON scenario file
    scenario: PathBuf,

    /// Only run the one-shot last known position and service state queries
    #[arg(long)]
    last_known: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    let raw = tokio::fs::read_to_string(&cli.scenario)
        .await
        .with_context(|| format!("Failed to read {}", cli.scenario.display()))?;
    let scenario = Scenario::from_json(&raw)?;

    info!(
        "Replaying {} event(s) from {}",
        scenario.timeline.len(),
        cli.scenario.display()
    );

    let outputs = if cli.last_known {
        last_known(scenario).await?
    } else {
        replay(scenario).await?
    };

    for output in outputs {
        let line = serde_json::to_string(&output).context("Failed to serialize output")?;
        println!("{line}");
    }

    Ok(())
}
