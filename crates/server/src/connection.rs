use bytes::{Buf, BytesMut};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use dcache_common::{ConnectionError, INITIAL_BUFFER_CAPACITY, ProtocolError};
use dcache_protocol::{Decode, Encode};

/// Metade de escrita compartilhável de uma conexão.
///
/// Handlers concorrentes de uma mesma conexão escrevem suas respostas por
/// aqui; cada frame é escrito inteiro sob o mutex, então frames nunca se
/// intercalam (mas a ordem entre eles não é garantida).
#[derive(Clone)]
pub struct FrameWriter {
    stream: Arc<Mutex<BufWriter<OwnedWriteHalf>>>,
}

impl FrameWriter {
    fn new(stream: OwnedWriteHalf) -> Self {
        Self {
            stream: Arc::new(Mutex::new(BufWriter::new(stream))),
        }
    }

    /// Escreve um frame no stream.
    pub async fn write_frame<T: Encode>(&self, frame: &T) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let mut stream = self.stream.lock().await;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Fecha o lado de escrita (envia FIN ao peer).
    pub async fn shutdown(&self) -> Result<(), ConnectionError> {
        let mut stream = self.stream.lock().await;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Wrapper sobre TcpStream com buffer para leitura de frames binários.
pub struct Connection {
    stream: OwnedReadHalf,
    buffer: BytesMut,
    writer: FrameWriter,
    addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (read, write) = stream.into_split();
        Self {
            stream: read,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            writer: FrameWriter::new(write),
            addr,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle para escrever nesta conexão a partir de outra task.
    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }

    /// Lê um frame completo do stream. Retorna None no EOF limpo e
    /// `ConnectionError::ConnectionReset` se o EOF chegar no meio de um frame.
    pub async fn read_frame<T: Decode>(&mut self) -> Result<Option<T>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Escreve um frame no stream.
    pub async fn write_frame<T: Encode>(&self, frame: &T) -> Result<(), ConnectionError> {
        self.writer.write_frame(frame).await
    }

    fn parse_frame<T: Decode>(&mut self) -> Result<Option<T>, ConnectionError> {
        let mut cursor = Cursor::new(&self.buffer[..]);

        match T::decode(&mut cursor) {
            Ok(frame) => {
                let len = cursor.position() as usize;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
