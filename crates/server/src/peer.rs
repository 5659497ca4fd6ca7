use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};

use dcache_common::ClientError;
use dcache_protocol::{Command, Decode, GetResponse, SetResponse, Status, ttl_to_wire};

use crate::Connection;

/// Cliente de um node: envia um comando e espera a resposta correspondente
/// na mesma conexão.
///
/// O protocolo não tem id de requisição, então só pode haver uma requisição
/// em voo por handle. Os métodos recebem `&mut self` justamente por isso.
pub struct PeerHandle {
    conn: Connection,
}

impl PeerHandle {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        Ok(Self::from_connection(Connection::new(stream, peer)))
    }

    /// Reaproveita uma conexão já aberta (ex.: a de um follower que enviou JOIN).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    pub async fn set(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), ClientError> {
        let cmd = Command::Set {
            key: key.into(),
            value: value.into(),
            ttl: ttl_to_wire(ttl),
        };
        self.send(&cmd).await
    }

    /// Valor da chave. `ClientError::KeyNotFound` se ela não existe no node.
    pub async fn get(&mut self, key: impl Into<Bytes>) -> Result<Bytes, ClientError> {
        let key = key.into();
        let cmd = Command::Get { key: key.clone() };
        let resp: GetResponse = self.request(&cmd).await?;
        match resp.status {
            Status::Ok => Ok(resp.value),
            Status::KeyNotFound => Err(ClientError::KeyNotFound(
                String::from_utf8_lossy(&key).into_owned(),
            )),
            status => Err(unexpected("GET", status)),
        }
    }

    pub async fn has(&mut self, key: impl Into<Bytes>) -> Result<bool, ClientError> {
        let cmd = Command::Has { key: key.into() };
        let resp: SetResponse = self.request(&cmd).await?;
        match resp.status {
            Status::Ok => Ok(true),
            Status::KeyNotFound => Ok(false),
            status => Err(unexpected("HAS", status)),
        }
    }

    pub async fn delete(&mut self, key: impl Into<Bytes>) -> Result<(), ClientError> {
        let cmd = Command::Delete { key: key.into() };
        self.send(&cmd).await
    }

    /// Anuncia esta conexão como follower. O leader não responde ao JOIN.
    pub async fn join(&mut self) -> Result<(), ClientError> {
        self.conn.write_frame(&Command::Join).await?;
        Ok(())
    }

    /// Envia um comando de escrita (SET/DELETE) já montado e exige status OK.
    pub async fn send(&mut self, cmd: &Command) -> Result<(), ClientError> {
        let resp: SetResponse = self.request(cmd).await?;
        if resp.status != Status::Ok {
            return Err(unexpected(cmd.name(), resp.status));
        }
        Ok(())
    }

    /// Encerra a conexão. Soltar o handle também fecha, mas sem FIN explícito.
    pub async fn close(self) -> Result<(), ClientError> {
        self.conn.writer().shutdown().await?;
        Ok(())
    }

    /// Devolve a conexão, ex.: para o follower passar a servir o que o
    /// leader manda por ela.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    async fn request<R: Decode>(&mut self, cmd: &Command) -> Result<R, ClientError> {
        self.conn.write_frame(cmd).await?;
        self.conn.read_frame::<R>().await?.ok_or(ClientError::Closed)
    }
}

fn unexpected(command: &'static str, status: Status) -> ClientError {
    ClientError::UnexpectedStatus {
        command,
        status: status.to_string(),
    }
}
