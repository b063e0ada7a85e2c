use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lvnet::client::NetworkApi;
use lvnet::client::virsh::DEFAULT_URI;
use lvnet::{
    AttachConfig, DomainDefinition, HostReconciler, InterfaceAttacher, MacGenerator, TaskConfig,
    VirshClient,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lvnet")]
#[command(
    about = "Attach libvirt networks and DHCP reservations to VM definitions",
    long_about = None
)]
struct Cli {
    /// libvirt connection URI
    #[arg(short, long, default_value = DEFAULT_URI)]
    connect: String,

    /// Path to the virsh binary
    #[arg(long, default_value = "virsh")]
    virsh: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the interfaces of a task config and print the domain devices
    Attach {
        /// Task config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Hostname for DHCP reservations (defaults to the task name)
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Show whether a network runs libvirt's DHCP server
    Classify {
        /// Network name
        network: String,
    },

    /// Show which <ip> element of a network contains an address
    SubnetIndex {
        /// Network name
        network: String,

        /// Guest address
        ip: IpAddr,
    },

    /// Generate guest MAC addresses
    GenMac {
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lvnet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AttachConfig::default();
    let api: Arc<dyn NetworkApi> = Arc::new(VirshClient::new(cli.virsh, cli.connect));

    match cli.command {
        Commands::Attach { config: path, hostname } => {
            let task = TaskConfig::load(&path)?;
            let hostname = hostname.or_else(|| task.name.clone());
            let mut domain = DomainDefinition::new(task.name.clone().unwrap_or_default());

            let mut attacher = InterfaceAttacher::new(api, &config);
            let result = attacher
                .attach(&mut domain, &task.interface_requests(), hostname.as_deref())
                .await;
            if let Err(e) = result {
                bail!(
                    "Interface attachment failed after {} of {} interfaces: {}",
                    domain.interfaces.len(),
                    task.network_interface.len(),
                    e
                );
            }

            info!(
                domain = %domain.name,
                interfaces = domain.interfaces.len(),
                "Attached interfaces"
            );
            println!("{}", domain.interfaces_xml()?);
        }

        Commands::Classify { network } => {
            let reconciler = HostReconciler::new(api.clone(), config.sentinel_index);
            let handle = api
                .lookup_network_by_name(&network)
                .await
                .with_context(|| format!("Failed to lookup network {}", network))?;
            let descriptor = reconciler.describe(&handle).await?;
            print!("{}", descriptor);
        }

        Commands::SubnetIndex { network, ip } => {
            let reconciler = HostReconciler::new(api.clone(), config.sentinel_index);
            let handle = api
                .lookup_network_by_name(&network)
                .await
                .with_context(|| format!("Failed to lookup network {}", network))?;
            let descriptor = reconciler.describe(&handle).await?;
            let index = descriptor.subnet_index(ip)?;
            println!("{}", index);
        }

        Commands::GenMac { count } => {
            let mut generator = MacGenerator::new(&config);
            for _ in 0..count {
                println!("{}", generator.generate()?);
            }
        }
    }

    Ok(())
}
