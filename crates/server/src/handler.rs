use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use dcache_common::ConnectionError;
use dcache_protocol::{Command, GetResponse, SetResponse, Status, ttl_from_wire};
use dcache_storage::Db;

use crate::replication::Replication;
use crate::{Connection, FrameWriter, PeerHandle};

/// Como uma sessão terminou.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// O cliente fechou a conexão.
    Closed,
    /// A conexão enviou JOIN e agora pertence à replicação.
    Joined,
}

/// Loop principal de tratamento de uma conexão.
///
/// A decodificação é estritamente sequencial, mas cada comando é tratado em
/// uma task própria enquanto o loop já lê o próximo frame. Por isso as
/// respostas de uma mesma conexão podem sair fora de ordem: o protocolo não
/// tem id de requisição. No máximo `max_inflight` comandos ficam em voo por
/// conexão; acima disso a leitura espera um handler terminar.
///
/// Um JOIN encerra o loop: a conexão passa para a replicação como peer e o
/// que chega por ela a partir daí são as respostas do follower.
pub async fn handle_connection(
    mut conn: Connection,
    db: Db,
    replication: Replication,
    max_inflight: usize,
) -> Result<SessionEnd, ConnectionError> {
    let inflight = Arc::new(Semaphore::new(max_inflight.max(1)));

    loop {
        let cmd = match conn.read_frame::<Command>().await? {
            Some(cmd) => cmd,
            None => return Ok(SessionEnd::Closed), // EOF
        };

        debug!("comando recebido de {}: {}", conn.peer_addr(), cmd.name());

        let Some(request) = Request::from_command(cmd) else {
            replication.register(PeerHandle::from_connection(conn));
            return Ok(SessionEnd::Joined);
        };

        // O semáforo nunca é fechado
        let Ok(permit) = inflight.clone().acquire_owned().await else {
            return Ok(SessionEnd::Closed);
        };

        let writer = conn.writer();
        let db = db.clone();
        let replication = replication.clone();
        tokio::spawn(async move {
            let name = request.name();
            if let Err(e) = execute_request(request, &writer, &db, &replication).await {
                warn!("falha ao responder {name}: {e}");
            }
            drop(permit);
        });
    }
}

/// Comandos que geram resposta; JOIN é consumido pelo loop de leitura.
enum Request {
    Set { key: Bytes, value: Bytes, ttl: i32 },
    Has { key: Bytes },
    Get { key: Bytes },
    Delete { key: Bytes },
}

impl Request {
    fn from_command(cmd: Command) -> Option<Request> {
        match cmd {
            Command::Set { key, value, ttl } => Some(Request::Set { key, value, ttl }),
            Command::Has { key } => Some(Request::Has { key }),
            Command::Get { key } => Some(Request::Get { key }),
            Command::Delete { key } => Some(Request::Delete { key }),
            Command::Join => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Request::Set { .. } => "SET",
            Request::Has { .. } => "HAS",
            Request::Get { .. } => "GET",
            Request::Delete { .. } => "DELETE",
        }
    }
}

/// Executa uma requisição e escreve a resposta na conexão de origem.
async fn execute_request(
    request: Request,
    writer: &FrameWriter,
    db: &Db,
    replication: &Replication,
) -> Result<(), ConnectionError> {
    match request {
        Request::Set { key, value, ttl } => {
            db.set(key.clone(), value.clone(), ttl_from_wire(ttl));
            // Replicação segue por fora; não atrasa a resposta
            replication.broadcast_set(key, value, ttl);
            writer.write_frame(&SetResponse::ok()).await
        }
        Request::Get { key } => {
            let value = db.get(&key);
            let response = if value.is_empty() {
                GetResponse::not_found()
            } else {
                GetResponse::ok(value)
            };
            writer.write_frame(&response).await
        }
        Request::Has { key } => {
            let status = if db.has(&key) {
                Status::Ok
            } else {
                Status::KeyNotFound
            };
            writer.write_frame(&SetResponse::new(status)).await
        }
        Request::Delete { key } => {
            db.delete(&key);
            replication.broadcast_delete(key);
            writer.write_frame(&SetResponse::ok()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcache_protocol::{Decode, Encode};
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    struct Session {
        client: TcpStream,
        db: Db,
        replication: Replication,
        task: JoinHandle<Result<SessionEnd, ConnectionError>>,
    }

    async fn session(max_inflight: usize) -> Session {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (socket, peer) = listener.accept().await.unwrap();

        let db = Db::new();
        let replication = Replication::new(16);
        let task = tokio::spawn(handle_connection(
            Connection::new(socket, peer),
            db.clone(),
            replication.clone(),
            max_inflight,
        ));
        Session {
            client,
            db,
            replication,
            task,
        }
    }

    async fn read_response<T: Decode>(client: &mut TcpStream, len: usize) -> T {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        T::decode(&mut Cursor::new(&buf[..])).unwrap()
    }

    #[tokio::test]
    async fn set_then_get() {
        let mut s = session(8).await;
        let set = Command::Set {
            key: Bytes::from("k"),
            value: Bytes::from("v"),
            ttl: 0,
        };
        s.client.write_all(&set.to_bytes()).await.unwrap();
        let resp: SetResponse = read_response(&mut s.client, 1).await;
        assert_eq!(resp, SetResponse::ok());
        assert_eq!(s.db.get(b"k"), Bytes::from("v"));

        let get = Command::Get {
            key: Bytes::from("k"),
        };
        s.client.write_all(&get.to_bytes()).await.unwrap();
        let resp: GetResponse = read_response(&mut s.client, 6).await;
        assert_eq!(resp, GetResponse::ok(Bytes::from("v")));
    }

    #[tokio::test]
    async fn get_missing_is_key_not_found() {
        let mut s = session(8).await;
        let get = Command::Get {
            key: Bytes::from("nope"),
        };
        s.client.write_all(&get.to_bytes()).await.unwrap();
        let resp: GetResponse = read_response(&mut s.client, 5).await;
        assert_eq!(resp.status, Status::KeyNotFound);
        assert!(resp.value.is_empty());
    }

    #[tokio::test]
    async fn has_and_delete() {
        let mut s = session(8).await;
        s.db.set(Bytes::from("k"), Bytes::from("v"), Duration::ZERO);

        let has = Command::Has {
            key: Bytes::from("k"),
        };
        s.client.write_all(&has.to_bytes()).await.unwrap();
        let resp: SetResponse = read_response(&mut s.client, 1).await;
        assert_eq!(resp.status, Status::Ok);

        let del = Command::Delete {
            key: Bytes::from("k"),
        };
        s.client.write_all(&del.to_bytes()).await.unwrap();
        let resp: SetResponse = read_response(&mut s.client, 1).await;
        assert_eq!(resp.status, Status::Ok);
        assert!(!s.db.has(b"k"));

        s.client.write_all(&has.to_bytes()).await.unwrap();
        let resp: SetResponse = read_response(&mut s.client, 1).await;
        assert_eq!(resp.status, Status::KeyNotFound);
    }

    #[tokio::test]
    async fn set_with_ttl_expires() {
        let mut s = session(8).await;
        let set = Command::Set {
            key: Bytes::from("a"),
            value: Bytes::from("1"),
            ttl: 50_000_000, // 50ms
        };
        s.client.write_all(&set.to_bytes()).await.unwrap();
        let _: SetResponse = read_response(&mut s.client, 1).await;
        assert!(s.db.has(b"a"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!s.db.has(b"a"));
    }

    #[tokio::test]
    async fn clean_eof_closes_without_error() {
        let s = session(8).await;
        drop(s.client);
        assert_eq!(s.task.await.unwrap().unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn unknown_tag_closes_with_protocol_error() {
        let mut s = session(8).await;
        s.client.write_all(&[6u8]).await.unwrap();
        assert!(matches!(
            s.task.await.unwrap(),
            Err(ConnectionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn join_hands_connection_to_replication() {
        let mut s = session(8).await;
        s.client.write_all(&Command::Join.to_bytes()).await.unwrap();
        assert_eq!(s.task.await.unwrap().unwrap(), SessionEnd::Joined);
        assert_eq!(s.replication.len(), 1);

        // O leader agora empurra escritas por essa conexão
        s.replication
            .broadcast_set(Bytes::from("x"), Bytes::from("y"), 0);
        let cmd: Command = {
            let expected = Command::Set {
                key: Bytes::from("x"),
                value: Bytes::from("y"),
                ttl: 0,
            };
            let len = expected.to_bytes().len();
            read_response(&mut s.client, len).await
        };
        assert!(matches!(cmd, Command::Set { ref value, .. } if value == "y"));
        s.client
            .write_all(&SetResponse::ok().to_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pipelined_requests_all_answered() {
        let mut s = session(2).await;
        let n = 50;
        let mut buf = bytes::BytesMut::new();
        for i in 0..n {
            Command::Set {
                key: Bytes::from(format!("key_{i}")),
                value: Bytes::from(format!("val_{i}")),
                ttl: 0,
            }
            .encode(&mut buf);
        }
        s.client.write_all(&buf).await.unwrap();

        for _ in 0..n {
            let resp: SetResponse = read_response(&mut s.client, 1).await;
            assert_eq!(resp.status, Status::Ok);
        }
        assert_eq!(s.db.len(), n);
    }
}
