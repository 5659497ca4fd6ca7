//! Replicação leader → followers.
//!
//! Todo follower que envia JOIN vira um peer registrado. Cada peer ganha uma
//! task própria, dona do seu `PeerHandle`, que consome um canal broadcast de
//! escritas: o handler de SET/DELETE só publica no canal e segue para a
//! resposta do cliente, então um peer lento ou travado nunca atrasa quem
//! escreveu, nem os outros peers.
//!
//! Não há ack nem retry. Um peer que atrasa mais que a capacidade do canal
//! perde as escritas mais antigas; um peer cuja conexão falha sai do registro
//! e, se voltar, é tratado como um node novo e vazio.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use dcache_common::ClientError;
use dcache_protocol::Command;

use crate::PeerHandle;

pub type PeerId = u64;

struct Inner {
    writes: broadcast::Sender<Command>,
    peers: DashMap<PeerId, SocketAddr>,
    next_id: AtomicU64,
}

/// Registro de peers + fan-out das escritas locais.
#[derive(Clone)]
pub struct Replication {
    inner: Arc<Inner>,
}

impl Replication {
    /// `capacity` é quantas escritas um peer pode ficar para trás antes de
    /// começar a perdê-las. Zero vira 1.
    pub fn new(capacity: usize) -> Self {
        let (writes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                writes,
                peers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registra um peer e inicia a task que encaminha escritas para ele.
    /// Sem detecção de duplicatas.
    pub fn register(&self, peer: PeerHandle) -> PeerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let addr = peer.peer_addr();
        // Subscribe antes de inserir: o peer só recebe o que vier depois do JOIN
        let rx = self.inner.writes.subscribe();
        self.inner.peers.insert(id, addr);
        info!("node entrou no cluster: {addr} (peer {id})");

        let replication = self.clone();
        tokio::spawn(async move {
            forward_to_peer(peer, rx).await;
            replication.inner.peers.remove(&id);
            info!("peer {id} ({addr}) removido do cluster");
        });

        id
    }

    /// Reenvia um SET para todos os peers registrados. Não bloqueia.
    pub fn broadcast_set(&self, key: Bytes, value: Bytes, ttl: i32) {
        self.broadcast(Command::Set { key, value, ttl });
    }

    /// Reenvia um DELETE para todos os peers registrados. Não bloqueia.
    pub fn broadcast_delete(&self, key: Bytes) {
        self.broadcast(Command::Delete { key });
    }

    fn broadcast(&self, cmd: Command) {
        // Err só significa que não há peers inscritos
        if let Ok(n) = self.inner.writes.send(cmd) {
            debug!("escrita publicada para {n} peer(s)");
        }
    }

    /// Endereços dos peers registrados.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.peers.iter().map(|e| *e.value()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.peers.is_empty()
    }
}

/// Encaminha as escritas para um peer, uma ida e volta por vez.
async fn forward_to_peer(mut peer: PeerHandle, mut rx: broadcast::Receiver<Command>) {
    let addr = peer.peer_addr();

    loop {
        let cmd = match rx.recv().await {
            Ok(cmd) => cmd,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("peer {addr} atrasado: perdeu {n} escritas");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match peer.send(&cmd).await {
            Ok(()) => {}
            // O peer respondeu, só não com OK: a conexão continua válida
            Err(e @ ClientError::UnexpectedStatus { .. }) => {
                warn!("forward para node {addr} falhou: {e}");
            }
            Err(e) => {
                error!("forward para node {addr} falhou: {e}");
                return;
            }
        }
    }
}
