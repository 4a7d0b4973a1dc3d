//! VM Lifecycle Handler
//!
//! Creates, reads, updates and deletes KubeVirt VirtualMachines described by
//! a YAML record, waiting on watch streams until the cluster reports the
//! outcome:
//! - create: VM ready, then an address on every lease-waiting interface
//! - delete: the deletion event, after marking the claims to remove
//!
//! The updated record is printed as YAML on stdout; logs go to stderr.

mod builder;
mod conditions;
mod config;
mod error;
mod lifecycle;
mod record;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::lifecycle::{Lifecycle, Operation};
use crate::record::VirtualMachineRecord;
use clap::Parser;
use kubevirt_client::KubevirtClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "vm-lifecycle", version, about = "Manage the lifecycle of a KubeVirt VirtualMachine")]
struct Cli {
    /// Operation to run
    #[arg(value_enum)]
    operation: Operation,

    /// YAML file holding the VM record
    #[arg(short, long)]
    record: PathBuf,

    /// Write the updated record back to the file instead of stdout
    #[arg(long)]
    in_place: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), LifecycleError> {
    // Configure rustls crypto provider (must be done before any TLS operations)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = LifecycleConfig::from_env()?;
    let mut record = VirtualMachineRecord::load(&cli.record)?;

    info!("Starting {:?} for VM {}/{}", cli.operation, record.namespace, record.name);
    info!("Configuration:");
    info!("  Create timeout: {:?}", config.create_timeout);
    info!("  Lease timeout: {:?}", config.lease_timeout);
    info!("  Delete timeout: {:?}", config.delete_timeout);
    info!("  Conflict retries: {}", config.conflict_retries);

    let client = KubevirtClient::try_default().await?;
    let lifecycle = Lifecycle::new(Arc::new(client), config);

    lifecycle.run(cli.operation, &mut record).await?;

    let output = serde_yaml::to_string(&record)?;
    if cli.in_place {
        std::fs::write(&cli.record, output)?;
        info!("Record written to {}", cli.record.display());
    } else {
        print!("{}", output);
    }

    Ok(())
}
