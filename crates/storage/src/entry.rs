use bytes::Bytes;
use tokio::time::Instant;

/// Entrada no store: valor + instante de expiração opcional.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub value: Bytes,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Bytes, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}
