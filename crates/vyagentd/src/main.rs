//! vyagentd entry point.
//!
//! Loads the bootstrap file, optionally opens the management port in the
//! local firewall, then serves command requests until SIGINT.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vyagent_common::bootstrap::DEFAULT_BOOTSTRAP_PATH;
use vyagent_common::{BootstrapConfig, Shell};
use vyagentd::plugins::management;
use vyagentd::{
    build_registry, router, serve, AgentContext, ConfigGuard, DEFAULT_LISTEN_IP, DEFAULT_LISTEN_PORT,
    DEFAULT_LOCK_PATH,
};

/// VyOS appliance control-plane agent
#[derive(Parser, Debug)]
#[command(name = "vyagentd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_LISTEN_IP)]
    ip: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Log file; logs go to stdout when unset
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Bootstrap file
    #[arg(long, default_value = DEFAULT_BOOTSTRAP_PATH)]
    bootstrap_file: PathBuf,

    /// Cross-process configuration lock file
    #[arg(long, default_value = DEFAULT_LOCK_PATH)]
    lock_file: PathBuf,

    /// Open the listen port in the management NIC firewall at start-up
    #[arg(long)]
    manage_firewall: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("vyagentd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "vyagentd: Starting");
    match run(args).await {
        Ok(()) => {
            info!("vyagentd: Exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "vyagentd: Exiting with error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("unable to open log file {}", path.display()))?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish()).context("failed to set logger")?;
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let bootstrap = BootstrapConfig::load(&args.bootstrap_file)
        .await
        .context("unable to load bootstrap file")?;

    let guard = ConfigGuard::new(&args.lock_file);
    let agent = Arc::new(AgentContext::new(bootstrap, Arc::new(Shell)).with_guard(guard.clone()));

    if agent.bootstrap().pxenic.is_some() {
        management::choose_pxe_ip(&agent)
            .await
            .context("unable to choose PXE address")?;
    } else {
        debug!("No PXE NIC in bootstrap file");
    }

    if args.manage_firewall {
        guard
            .run(management::configure_management_firewall(&agent, &args.ip, args.port))
            .await
            .context("unable to open management port")?;
    }

    let registry = Arc::new(build_registry(&guard));
    let addr: SocketAddr = format!("{}:{}", args.ip, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.ip, args.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to bind {}", addr))?;

    serve(listener, router(registry, agent), shutdown_signal())
        .await
        .context("command server failed")
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("vyagentd: Received SIGINT, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["vyagentd"]);
        assert_eq!(args.ip, "0.0.0.0");
        assert_eq!(args.port, 10002);
        assert_eq!(args.bootstrap_file, PathBuf::from(DEFAULT_BOOTSTRAP_PATH));
        assert_eq!(args.lock_file, PathBuf::from(DEFAULT_LOCK_PATH));
        assert!(!args.manage_firewall);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_args_override() {
        let args = Args::parse_from([
            "vyagentd",
            "--ip",
            "10.0.0.5",
            "--port",
            "7272",
            "--manage-firewall",
            "--lock-file",
            "/tmp/vyagent.lock",
        ]);
        assert_eq!(args.ip, "10.0.0.5");
        assert_eq!(args.port, 7272);
        assert!(args.manage_firewall);
        assert_eq!(args.lock_file, PathBuf::from("/tmp/vyagent.lock"));
    }
}
