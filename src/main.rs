//! # JetStream Controller
//!
//! A Kubernetes controller that keeps NATS JetStream streams and consumers in
//! line with `Stream` and `Consumer` custom resources.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (default)
//! jetstream-controller run
//!
//! # Print both CRDs
//! jetstream-controller crds | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jetstream_controller::config::ControllerConfig;
use jetstream_controller::crd::{Consumer, Stream};
use jetstream_controller::runtime::initialization::initialize;
use kube::CustomResourceExt;

/// Kubernetes controller for NATS JetStream streams and consumers
#[derive(Debug, Parser)]
#[command(name = "jetstream-controller", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the controller
    Run,
    /// Print the Stream and Consumer CRDs as YAML
    Crds,
}

fn crds_yaml() -> Result<String> {
    let stream = serde_yaml::to_string(&Stream::crd()).context("Failed to render Stream CRD")?;
    let consumer =
        serde_yaml::to_string(&Consumer::crd()).context("Failed to render Consumer CRD")?;
    Ok(format!("{stream}---\n{consumer}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Crds => {
            print!("{}", crds_yaml()?);
            Ok(())
        }
        Command::Run => {
            let runtime = initialize(ControllerConfig::from_env()).await?;
            runtime.run().await
        }
    }
}
