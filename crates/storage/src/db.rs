use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::entry::Entry;

/// Mapa protegido por um único RwLock: leitores concorrem entre si, nunca
/// com um escritor.
#[derive(Default)]
struct State {
    entries: HashMap<Bytes, Entry>,
    /// (instante, chave) ordenado por instante para purga eficiente.
    expirations: BTreeSet<(Instant, Bytes)>,
}

/// Estado compartilhado entre todas as conexões.
struct SharedState {
    state: RwLock<State>,
    notify_expiry: Notify,
}

impl SharedState {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle para o cache in-memory.
///
/// Cada entrada guarda seu próprio instante de expiração. Uma task de fundo
/// dorme até a expiração mais próxima e remove apenas chaves cuja entrada
/// *atual* já expirou, então um SET que sobrescreve uma chave nunca é
/// apagado pelo TTL do valor antigo.
///
/// `Db::new` precisa ser chamado dentro de um runtime tokio.
#[derive(Clone)]
pub struct Db {
    shared: Arc<SharedState>,
}

impl Db {
    pub fn new() -> Self {
        let db = Db {
            shared: Arc::new(SharedState {
                state: RwLock::new(State::default()),
                notify_expiry: Notify::new(),
            }),
        };

        // Spawn background task para purgar keys expiradas
        let shared = db.shared.clone();
        tokio::spawn(async move {
            purge_expired_keys(shared).await;
        });

        db
    }

    /// Insere ou sobrescreve `key`. `ttl == 0` significa sem expiração, assim
    /// como um TTL grande demais para caber num `Instant`.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };

        let mut state = self.shared.write();
        let previous = state
            .entries
            .insert(key.clone(), Entry::new(value, expires_at));

        if let Some(at) = previous.and_then(|e| e.expires_at) {
            state.expirations.remove(&(at, key.clone()));
        }

        if let Some(at) = expires_at {
            state.expirations.insert((at, key));
            drop(state);
            self.shared.notify_expiry.notify_one();
        }
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.shared
            .read()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired())
    }

    /// Valor armazenado, ou bytes vazios se a chave não existe.
    pub fn get(&self, key: &[u8]) -> Bytes {
        match self.shared.read().entries.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.clone(),
            _ => Bytes::new(),
        }
    }

    /// Remove a chave. Sempre retorna `true`, exista ela ou não.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut state = self.shared.write();
        if let Some(entry) = state.entries.remove(key)
            && let Some(at) = entry.expires_at
        {
            state
                .expirations
                .remove(&(at, Bytes::copy_from_slice(key)));
        }
        true
    }

    /// Número de entradas ainda não expiradas.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shared
            .read()
            .entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task que purga chaves expiradas.
async fn purge_expired_keys(shared: Arc<SharedState>) {
    loop {
        let next_expiry = shared.read().expirations.iter().next().map(|e| e.0);

        match next_expiry {
            Some(when) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(when) => {}
                    _ = shared.notify_expiry.notified() => { continue; }
                }
            }
            None => {
                shared.notify_expiry.notified().await;
                continue;
            }
        }

        let now = Instant::now();
        let mut state = shared.write();

        while let Some((when, key)) = state.expirations.first().cloned() {
            if when > now {
                break; // BTreeSet é ordenado, os próximos são todos futuros
            }
            state.expirations.remove(&(when, key.clone()));

            // Só remove se a entrada atual realmente expirou (pode ter sido re-setada)
            if state.entries.get(&key).is_some_and(|e| e.is_expired_at(now)) {
                state.entries.remove(&key);
                debug!("key expirada removida: {}", String::from_utf8_lossy(&key));
            }
        }
    }
}
