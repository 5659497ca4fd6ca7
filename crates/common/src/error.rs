/// Erros de decodificação do protocolo binário.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame incompleto")]
    Incomplete,
    #[error("invalid command: tag {0:#x}")]
    InvalidCommand(u8),
    #[error("status inválido: {0:#x}")]
    InvalidStatus(u8),
    #[error("comprimento inválido: {0}")]
    InvalidLength(i32),
    #[error("campo excede tamanho máximo ({0} bytes)")]
    FieldTooLarge(usize),
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// O peer fechou a conexão no meio de um frame.
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Erros vistos por quem usa um `PeerHandle`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("[GET] chave não encontrada ({0})")]
    KeyNotFound(String),
    #[error("[{command}] servidor respondeu com status diferente de OK [{status}]")]
    UnexpectedStatus {
        command: &'static str,
        status: String,
    },
    #[error("servidor fechou a conexão")]
    Closed,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Erro top-level do dcache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Result type alias.
pub type CacheResult<T> = Result<T, CacheError>;

// Conversão implícita de io::Error → CacheError (via ConnectionError)
impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Connection(ConnectionError::Io(e))
    }
}

// Erros de I/O no cliente chegam sempre embrulhados em ConnectionError
impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Connection(ConnectionError::Io(e))
    }
}
