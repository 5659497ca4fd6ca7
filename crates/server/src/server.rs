use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use dcache_common::{
    CacheResult, ConnectionError, DEFAULT_LISTEN_ADDR, MAX_INFLIGHT_PER_CONNECTION,
    REPLICATION_BUFFER,
};
use dcache_storage::Db;

use crate::replication::Replication;
use crate::{Connection, PeerHandle, SessionEnd, handle_connection};

/// Configuração de um node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Sem leader este node é o leader.
    pub leader_addr: Option<String>,
    pub max_inflight: usize,
    pub replication_buffer: usize,
}

impl ServerConfig {
    pub fn is_leader(&self) -> bool {
        self.leader_addr.is_none()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            leader_addr: None,
            max_inflight: MAX_INFLIGHT_PER_CONNECTION,
            replication_buffer: REPLICATION_BUFFER,
        }
    }
}

/// Um node do cluster: listener + store + registro de peers.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    db: Db,
    replication: Replication,
}

impl Server {
    /// Faz o bind do listener. Falha aqui é fatal para quem chamou.
    pub async fn bind(config: ServerConfig, db: Db) -> CacheResult<Server> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let replication = Replication::new(config.replication_buffer);
        Ok(Server {
            config,
            listener,
            db,
            replication,
        })
    }

    pub fn local_addr(&self) -> CacheResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn replication(&self) -> &Replication {
        &self.replication
    }

    /// Serve até o processo terminar. Se houver leader configurado, entra no
    /// cluster dele em paralelo.
    pub async fn run(self) -> CacheResult<()> {
        let addr = self.local_addr()?;

        if let Some(leader_addr) = self.config.leader_addr.clone() {
            let db = self.db.clone();
            let replication = self.replication.clone();
            let max_inflight = self.config.max_inflight;
            tokio::spawn(async move {
                join_leader(leader_addr, db, replication, max_inflight).await;
            });
        }

        let role = if self.config.is_leader() {
            "leader"
        } else {
            "follower"
        };
        info!("dcache ({role}) escutando em {addr}");

        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    error!("erro ao aceitar conexão: {e}");
                    continue;
                }
            };

            info!("nova conexão: {peer}");
            let db = self.db.clone();
            let replication = self.replication.clone();
            let max_inflight = self.config.max_inflight;

            tokio::spawn(async move {
                let conn = Connection::new(socket, peer);
                run_session(conn, db, replication, max_inflight).await;
            });
        }
    }
}

/// Ponto de entrada do ciclo de vida: bind em `listen_addr`, entra no
/// cluster do leader se houver um, e serve para sempre.
pub async fn serve(config: ServerConfig) -> CacheResult<()> {
    Server::bind(config, Db::new()).await?.run().await
}

/// Roda uma sessão e loga como ela terminou.
async fn run_session(conn: Connection, db: Db, replication: Replication, max_inflight: usize) {
    let peer = conn.peer_addr();
    match handle_connection(conn, db, replication, max_inflight).await {
        Ok(SessionEnd::Closed) => {}
        Ok(SessionEnd::Joined) => {
            info!("conexão {peer} passou a ser peer de replicação");
            return;
        }
        Err(ConnectionError::ConnectionReset) => {
            debug!("conexão {peer} encerrada no meio de um frame");
        }
        Err(ConnectionError::Protocol(e)) => {
            error!("erro de protocolo na conexão {peer}: {e}");
        }
        Err(e) => error!("erro na conexão {peer}: {e}"),
    }
    info!("conexão encerrada: {peer}");
}

/// Disca o leader, envia JOIN e passa a servir essa mesma conexão: os SETs
/// replicados chegam por ela e são aplicados como os de qualquer cliente.
/// Sem heartbeat e sem re-discagem.
async fn join_leader(leader_addr: String, db: Db, replication: Replication, max_inflight: usize) {
    let mut leader = match PeerHandle::connect(&leader_addr).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("falha ao conectar no leader [{leader_addr}]: {e}");
            return;
        }
    };

    info!("conectado ao leader: {leader_addr}");
    if let Err(e) = leader.join().await {
        error!("erro ao enviar JOIN para o leader: {e}");
        return;
    }

    run_session(leader.into_connection(), db, replication, max_inflight).await;
}
