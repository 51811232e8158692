//! Peer outbox host - delivers queued drive files to recipient identity hosts.

mod app;
mod local_peers;
mod local_storage;

use std::path::PathBuf;

use app::Host;
use clap::{Parser, Subcommand};
use outbox_config_and_utils::{init_logging, Config, Paths};
use peer_outbox::{InternalDriveFileId, Recipient, SendContents, TenantId, TransitOptions};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Peer outbox command-line interface.
#[derive(Parser)]
#[command(name = "peer-outbox")]
#[command(about = "Durable outbox delivering drive files to peer identity hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for the database, tenants and logs. Defaults to ~/.peer-outbox
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the outbox driver until interrupted
    Run,
    /// Drain one tenant's outbox once
    ProcessOutbox {
        #[arg(long)]
        tenant: TenantId,
        /// Items leased per batch. Defaults to the configured batch size.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show queue and wake-index state
    Status {
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Release leases held longer than the lease timeout
    ReclaimLeases,
    /// Queue a file for delivery to one or more recipients
    Send {
        #[arg(long)]
        tenant: TenantId,
        /// Drive holding the file
        #[arg(long)]
        drive: Uuid,
        #[arg(long)]
        file: Uuid,
        /// Recipient identity host; repeat for several
        #[arg(long = "recipient", required = true)]
        recipients: Vec<Recipient>,
        /// Send metadata only, without payloads or thumbnails
        #[arg(long)]
        header_only: bool,
        /// Delete the file once every recipient has been serviced
        #[arg(long)]
        transient: bool,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Show the latest delivery status per recipient of a file
    History {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        drive: Uuid,
        #[arg(long)]
        file: Uuid,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, Some(paths.logs_dir()));

    let host = Host::open(paths, config.clone()).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let signal = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received shutdown signal");
                }
                let _ = shutdown_tx.send(());
            });
            host.run(shutdown_rx).await?;
            signal.abort();
            info!("Outbox host stopped");
        }
        Commands::ProcessOutbox { tenant, batch_size } => {
            let batch_size = batch_size.unwrap_or(config.outbox.batch_size);
            print_json(&host.process_outbox(&tenant, batch_size).await?)?;
        }
        Commands::Status { tenant } => {
            print_json(&host.status(tenant.as_ref()).await?)?;
        }
        Commands::ReclaimLeases => {
            let report = host.reclaim_leases().await?;
            println!(
                "released {} outbox lease(s) over {} row(s), {} wake-index lease(s); re-signaled {} tenant(s)",
                report.outbox_leases,
                report.outbox_rows,
                report.pending_leases,
                report.tenants.len()
            );
        }
        Commands::Send {
            tenant,
            drive,
            file,
            recipients,
            header_only,
            transient,
            priority,
        } => {
            let file = InternalDriveFileId::new(drive, file)?;
            let mut options = TransitOptions::to(recipients);
            if header_only {
                options.send_contents = SendContents::header_only();
            }
            options.is_transient_file = transient;
            options.priority = priority;
            print_json(&host.send(&tenant, file, options).await?)?;
        }
        Commands::History { tenant, drive, file } => {
            let file = InternalDriveFileId::new(drive, file)?;
            print_json(&host.history_of(&tenant, &file).await?)?;
        }
    }

    Ok(())
}
