use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use replica_client::{
    cli::{Cli, Command, ConnectionArgs, ProbeKind},
    proximity::{PingProbe, TcpConnectProbe},
    session::ClientSession,
    shell,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn connect(args: &ConnectionArgs) -> Result<ClientSession> {
    let config = args.config();
    let session = match args.probe {
        ProbeKind::Ping => ClientSession::connect(config, &PingProbe::default()).await,
        ProbeKind::Tcp => ClientSession::connect(config, &TcpConnectProbe::default()).await,
    };
    session.with_context(|| format!("failed to bootstrap from directory {}", args.directory))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let session = connect(&cli.connection).await?;
    info!(closest = session.closest(), leader = ?session.leader(), "session ready");

    match cli.command {
        Command::Put { key, value } => session.write(key, value.into_bytes()).await?,
        Command::Get { key } => println!("{}", String::from_utf8_lossy(&session.read(key).await?)),
        Command::Scan { key } => println!("{}", String::from_utf8_lossy(&session.scan(key).await?)),
        Command::Shell => shell::run(&session).await?,
    }

    session.close().await;
    Ok(())
}
