use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use xgbe_stack::capture::{interface_mac, run_link, AfPacketSocket};
use xgbe_stack::config::{self, Config};
use xgbe_stack::dataplane::{ClientInterface, Stack, StackConfig, StackHandle};
use xgbe_stack::telemetry::init_logging;

#[derive(Parser)]
#[command(name = "xgbe-stack")]
#[command(about = "Streaming Ethernet/IPv4/UDP endpoint on a raw interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the stack on the configured interface
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Seconds between statistics dumps (0 disables them)
        #[arg(long, default_value_t = 60)]
        stats_interval: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Check config.toml and report problems
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config {
            action: ConfigAction::Validate { config },
        } => {
            init_logging(None);
            cmd_config_validate(&config)
        }
        Commands::Run {
            config,
            stats_interval,
        } => cmd_run(&config, stats_interval),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    let config = config::load(config_path).map_err(|e| e.to_string())?;
    let result = config::validate(&config);
    result.print_diagnostics();
    if result.has_errors() {
        return Err(format!("{} error(s) found", result.errors.len()));
    }
    println!("{}: OK ({} client(s))", config_path.display(), config.clients.len());
    Ok(())
}

fn cmd_run(config_path: &PathBuf, stats_interval: u64) -> Result<(), String> {
    let mut config = config::load(config_path).map_err(|e| e.to_string())?;
    init_logging(Some(&config.logging));
    info!("Loaded {}", config_path.display());

    let validation = config::validate(&config);
    for warning in &validation.warnings {
        warn!("config: {}", warning);
    }
    if validation.has_errors() {
        validation.print_diagnostics();
        return Err("invalid configuration".to_string());
    }

    let ifname = config
        .host
        .interface
        .clone()
        .ok_or_else(|| "host.interface is required to run".to_string())?;
    let promisc = resolve_mac(&mut config, &ifname)?;
    let stack_config = StackConfig::from_config(&config).map_err(|e| e.to_string())?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let socket = AfPacketSocket::bind(&ifname, promisc).map_err(|e| e.to_string())?;
        let (handle, phy, clients) = Stack::spawn(stack_config);
        let mut link = tokio::spawn(run_link(Arc::new(socket), phy));

        for (client, client_config) in clients.into_iter().zip(&config.clients) {
            match client_config.bridge {
                Some(addr) => {
                    let socket = UdpSocket::bind(addr)
                        .await
                        .map_err(|e| format!("{}: bind {}: {}", client.name(), addr, e))?;
                    info!("Bridging {} to {}", client.name(), addr);
                    tokio::spawn(bridge_client(client, socket));
                }
                None => {
                    tokio::spawn(discard_client(client));
                }
            }
        }

        let period = Duration::from_secs(stats_interval.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                result = &mut link => {
                    return match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(format!("link failed: {}", e)),
                        Err(e) => Err(format!("link task failed: {}", e)),
                    };
                }
                _ = ticker.tick(), if stats_interval > 0 => log_stats(&handle),
            }
        }
    })
}

/// Fill in the interface MAC when none is configured. Returns whether the
/// socket must be promiscuous to see frames for the configured MAC.
fn resolve_mac(config: &mut Config, ifname: &str) -> Result<bool, String> {
    let hw_mac = interface_mac(ifname);
    match (config.host.mac, hw_mac) {
        (Some(mac), Ok(hw)) => Ok(mac != hw),
        (Some(_), Err(e)) => {
            warn!("Cannot read MAC of {}: {}", ifname, e);
            Ok(true)
        }
        (None, Ok(hw)) => {
            info!("Using {} MAC {}", ifname, hw);
            config.host.mac = Some(hw);
            Ok(false)
        }
        (None, Err(e)) => Err(format!("host.mac unset and {}", e)),
    }
}

/// Relay between a client interface and a local UDP socket. Replies go to
/// the last local peer that sent something.
async fn bridge_client(client: ClientInterface, socket: UdpSocket) {
    let name = client.name().to_string();
    let (mut sender, mut receiver) = client.into_split();
    let mut peer: Option<SocketAddr> = None;
    let mut buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    peer = Some(from);
                    if sender.send(&buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{}: local socket error: {}", name, e);
                    break;
                }
            },
            datagram = receiver.recv() => match datagram {
                Some(d) => match peer {
                    Some(to) => {
                        if let Err(e) = socket.send_to(&d.payload, to).await {
                            debug!("{}: send to {} failed: {}", name, to, e);
                        }
                    }
                    None => debug!("{}: no local peer yet, dropping datagram", name),
                },
                None => break,
            },
        }
    }
    debug!("{}: bridge stopped", name);
}

/// Keep an unbridged client from back-pressuring the stack.
async fn discard_client(mut client: ClientInterface) {
    while let Some(d) = client.recv().await {
        debug!(
            "{}: {} bytes from {}:{} discarded",
            client.name(),
            d.payload.len(),
            d.src_ip,
            d.src_port
        );
    }
}

fn log_stats(handle: &StackHandle) {
    let host = handle.host_state();
    info!(
        "host ip={:?} dhcp={:?} arp_entries={}",
        host.ip(),
        host.dhcp_state,
        handle.arp.len()
    );
    for (name, value) in handle.stats.export() {
        if value > 0 {
            info!("  {} = {}", name, value);
        }
    }
}
