use clap::Parser;
use tokio::signal;
use tracing::info;

use dcache_common::{DEFAULT_LISTEN_ADDR, MAX_INFLIGHT_PER_CONNECTION, REPLICATION_BUFFER};
use dcache_server::{Server, ServerConfig};
use dcache_storage::Db;

#[derive(Parser, Debug)]
#[command(name = "dcache-server", about = "dcache — cache distribuído in-memory")]
struct Args {
    /// Endereço de escuta do servidor
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: String,
    /// Endereço do leader; sem ele este node é o leader
    #[arg(long)]
    leader_addr: Option<String>,
    /// Comandos em voo por conexão
    #[arg(long, default_value_t = MAX_INFLIGHT_PER_CONNECTION)]
    max_inflight: usize,
    /// Escritas que um follower pode ficar para trás antes de perdê-las
    #[arg(long, default_value_t = REPLICATION_BUFFER)]
    replication_buffer: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcache_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        listen_addr: args.listen_addr,
        // `--leader-addr ""` também significa leader
        leader_addr: args.leader_addr.filter(|a| !a.is_empty()),
        max_inflight: args.max_inflight,
        replication_buffer: args.replication_buffer,
    };

    let server = Server::bind(config, Db::new()).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = signal::ctrl_c() => {
            info!("shutdown signal recebido");
        }
    }

    Ok(())
}
