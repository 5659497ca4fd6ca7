use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};

use dcache_common::ClientError;
use dcache_protocol::{Command, Encode};
use dcache_server::{PeerHandle, Replication, Server, ServerConfig};
use dcache_storage::Db;

/// Sobe um node em porta efêmera e devolve (endereço, store, replicação).
async fn start_node(leader_addr: Option<SocketAddr>) -> (SocketAddr, Db, Replication) {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        leader_addr: leader_addr.map(|a| a.to_string()),
        ..Default::default()
    };
    let server = Server::bind(config, Db::new()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let db = server.db().clone();
    let replication = server.replication().clone();
    tokio::spawn(server.run());
    (addr, db, replication)
}

/// Repete `check` até ele retornar true ou o prazo estourar.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_set_get() {
    let (addr, _, _) = start_node(None).await;
    let mut client = PeerHandle::connect(addr).await.unwrap();

    client.set("mykey", "myvalue", Duration::ZERO).await.unwrap();
    assert_eq!(client.get("mykey").await.unwrap(), Bytes::from("myvalue"));
}

#[tokio::test]
async fn test_get_nonexistent() {
    let (addr, _, _) = start_node(None).await;
    let mut client = PeerHandle::connect(addr).await.unwrap();

    assert!(matches!(
        client.get("missing").await,
        Err(ClientError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_has_delete() {
    let (addr, _, _) = start_node(None).await;
    let mut client = PeerHandle::connect(addr).await.unwrap();

    client.set("a", "1", Duration::ZERO).await.unwrap();
    assert!(client.has("a").await.unwrap());

    client.delete("a").await.unwrap();
    assert!(!client.has("a").await.unwrap());

    // DELETE de chave inexistente também é OK
    client.delete("never-set").await.unwrap();
}

#[tokio::test]
async fn test_set_with_ttl() {
    let (addr, _, _) = start_node(None).await;
    let mut client = PeerHandle::connect(addr).await.unwrap();

    client
        .set("a", "1", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(client.get("a").await.unwrap(), Bytes::from("1"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(
        client.get("a").await,
        Err(ClientError::KeyNotFound(_))
    ));
    assert!(!client.has("a").await.unwrap());
}

#[tokio::test]
async fn test_empty_value_vs_missing_on_the_wire() {
    let (addr, _, _) = start_node(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // SET com valor vazio é guardado, mas o GET não o distingue de ausência
    let set = Command::Set {
        key: Bytes::from("empty"),
        value: Bytes::new(),
        ttl: 0,
    };
    stream.write_all(&set.to_bytes()).await.unwrap();
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [1]);

    let get = Command::Get {
        key: Bytes::from("empty"),
    };
    stream.write_all(&get.to_bytes()).await.unwrap();
    let mut resp = [0u8; 5];
    stream.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [3, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_replication_to_follower() {
    let (leader_addr, _, leader_replication) = start_node(None).await;
    let (follower_addr, _, _) = start_node(Some(leader_addr)).await;

    assert!(eventually(|| leader_replication.len() == 1).await);

    let mut leader = PeerHandle::connect(leader_addr).await.unwrap();
    leader.set("x", "y", Duration::ZERO).await.unwrap();

    // GET direto no follower, com espera limitada
    let mut follower = PeerHandle::connect(follower_addr).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match follower.get("x").await {
            Ok(value) => {
                assert_eq!(value, Bytes::from("y"));
                break;
            }
            Err(ClientError::KeyNotFound(_)) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("follower não recebeu o SET do leader: {e}"),
        }
    }
}

#[tokio::test]
async fn test_delete_is_replicated() {
    let (leader_addr, _, leader_replication) = start_node(None).await;
    let (_, follower_db, _) = start_node(Some(leader_addr)).await;

    assert!(eventually(|| leader_replication.len() == 1).await);

    let mut leader = PeerHandle::connect(leader_addr).await.unwrap();
    leader.set("k", "v", Duration::ZERO).await.unwrap();
    assert!(eventually(|| follower_db.has(b"k")).await);

    leader.delete("k").await.unwrap();
    assert!(eventually(|| !follower_db.has(b"k")).await);
}

#[tokio::test]
async fn test_follower_without_leader_still_serves() {
    // Porta sem ninguém escutando: o JOIN falha e o node segue sozinho
    let unused = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (addr, _, _) = start_node(Some(unused)).await;

    let mut client = PeerHandle::connect(addr).await.unwrap();
    client.set("solo", "1", Duration::ZERO).await.unwrap();
    assert_eq!(client.get("solo").await.unwrap(), Bytes::from("1"));
}

#[tokio::test]
async fn test_malformed_tag_closes_only_that_connection() {
    let (addr, _, _) = start_node(None).await;
    let mut healthy = PeerHandle::connect(addr).await.unwrap();
    healthy.set("k", "v", Duration::ZERO).await.unwrap();

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(&[6u8, 1, 2, 3]).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), bad.read(&mut buf))
        .await
        .expect("servidor deveria fechar a conexão")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // Outras conexões seguem normais
    assert_eq!(healthy.get("k").await.unwrap(), Bytes::from("v"));
    let mut fresh = PeerHandle::connect(addr).await.unwrap();
    assert_eq!(fresh.get("k").await.unwrap(), Bytes::from("v"));
}

#[tokio::test]
async fn test_concurrent_clients_distinct_keys() {
    let (addr, _, _) = start_node(None).await;
    let n = 50;

    let mut handles = Vec::new();
    for i in 0..n {
        handles.push(tokio::spawn(async move {
            let mut client = PeerHandle::connect(addr).await.unwrap();
            client
                .set(format!("key_{i}"), format!("val_{i}"), Duration::ZERO)
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..n {
        handles.push(tokio::spawn(async move {
            let mut client = PeerHandle::connect(addr).await.unwrap();
            let value = client.get(format!("key_{i}")).await.unwrap();
            assert_eq!(value, Bytes::from(format!("val_{i}")));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}
