use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use dcache_common::{ClientError, DEFAULT_LISTEN_ADDR};
use dcache_protocol::MAX_TTL;
use dcache_server::PeerHandle;

#[derive(Parser, Debug)]
#[command(name = "dcache-cli", about = "dcache CLI client")]
struct Args {
    /// Endereço do node
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    addr: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Grava uma chave (TTL máximo ~2147 ms, limite do protocolo)
    Set {
        key: String,
        value: String,
        #[arg(long = "ttl-ms", default_value = "0", value_parser = parse_ttl_ms)]
        ttl: Duration,
    },
    Get {
        key: String,
    },
    Has {
        key: String,
    },
    Del {
        key: String,
    },
    /// N clientes concorrentes: cada um grava key_i = val_i e lê de volta
    Workload {
        #[arg(long, default_value_t = 100)]
        clients: usize,
        #[arg(long = "ttl-ms", default_value = "0", value_parser = parse_ttl_ms)]
        ttl: Duration,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcache_cli=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Cmd::Workload { clients, ttl } = args.command {
        return run_workload(&args.addr, clients, ttl).await;
    }

    let mut client = PeerHandle::connect(&args.addr).await?;
    let output = match args.command {
        Cmd::Set { key, value, ttl } => {
            client.set(key, value, ttl).await?;
            "OK".to_string()
        }
        Cmd::Get { key } => match client.get(key).await {
            Ok(value) => format_value(&value),
            Err(ClientError::KeyNotFound(_)) => "(nil)".to_string(),
            Err(e) => return Err(e.into()),
        },
        Cmd::Has { key } => format_bool(client.has(key).await?),
        Cmd::Del { key } => {
            client.delete(key).await?;
            "OK".to_string()
        }
        Cmd::Workload { .. } => unreachable!("tratado acima"),
    };
    println!("{output}");
    client.close().await?;

    Ok(())
}

/// Cada cliente abre sua conexão, grava `key_i`, lê de volta e imprime.
async fn run_workload(addr: &str, clients: usize, ttl: Duration) -> anyhow::Result<()> {
    let mut handles = Vec::with_capacity(clients);

    for i in 0..clients {
        let addr = addr.to_string();
        handles.push(tokio::spawn(async move {
            let key = Bytes::from(format!("key_{i}"));
            let value = Bytes::from(format!("val_{i}"));

            let mut client = PeerHandle::connect(addr).await?;
            client.set(key.clone(), value, ttl).await?;
            let fetched = client.get(key).await?;
            println!("{}", String::from_utf8_lossy(&fetched));
            client.close().await
        }));
    }

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("cliente do workload falhou: {e}");
                failures += 1;
            }
            Err(e) => {
                error!("task do workload abortou: {e}");
                failures += 1;
            }
        }
    }

    info!("workload concluído: {} ok, {failures} falhas", clients - failures);
    if failures > 0 {
        anyhow::bail!("{failures} de {clients} clientes falharam");
    }
    Ok(())
}

/// `--ttl-ms` acima do que o fio expressa é erro, não truncamento.
fn parse_ttl_ms(s: &str) -> Result<Duration, String> {
    let ms: u64 = s.parse().map_err(|e| format!("TTL inválido '{s}': {e}"))?;
    let ttl = Duration::from_millis(ms);
    if ttl > MAX_TTL {
        return Err(format!(
            "TTL de {ms} ms excede o máximo do protocolo ({} ms)",
            MAX_TTL.as_millis()
        ));
    }
    Ok(ttl)
}

/// Formata um valor para exibição humana.
fn format_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(s) => format!("\"{s}\""),
        Err(_) => format!("(binary) {} bytes", value.len()),
    }
}

fn format_bool(b: bool) -> String {
    format!("(integer) {}", b as i64)
}
