//! Integration tests for the log server over TCP.

use gcl_core::metadata::ids;
use gcl_core::{ErrorKind, LogRecord, MetadataSet, Name, ServerId, StoreConfig, Timestamp};
use gcl_protocol::{read_packet_async, Command};
use gcl_server::{
    GclClient, GclServer, LogRegistry, ReplicaEndpoint, ReplicationConfig, ServerConfig,
    TcpReplicaTransport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

struct Node {
    server: Arc<GclServer>,
    addr: SocketAddr,
    name: ServerId,
}

/// Starts an in-memory server; `peers` lists the other replicas.
async fn start(name: &str, peers: &[(&str, SocketAddr)]) -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let local = Name::parse(name);

    let mut replicas = vec![ReplicaEndpoint::new(local, addr.to_string())];
    replicas.extend(
        peers
            .iter()
            .map(|(peer, peer_addr)| ReplicaEndpoint::new(Name::parse(peer), peer_addr.to_string())),
    );
    let config = ServerConfig::new(addr)
        .with_local_name(local)
        .with_request_timeout(Duration::from_secs(5))
        .with_replication(
            ReplicationConfig::default()
                .with_replicas(replicas)
                .with_ack_timeout(Duration::from_secs(2))
                .with_reap_interval(Duration::from_millis(50)),
        );
    let transport = TcpReplicaTransport::new(local, Duration::from_secs(2)).unwrap();
    let registry = Arc::new(LogRegistry::in_memory(StoreConfig::default()));
    let server = Arc::new(GclServer::with_parts(config, registry, Arc::new(transport)));

    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(listener).await });
    Node {
        server,
        addr,
        name: local,
    }
}

async fn client(node: &Node) -> GclClient {
    GclClient::connect(node.addr)
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hello_world_standalone() {
    let node = start("solo", &[]).await;
    let mut client = client(&node).await;
    let log = Name::parse("greetings");

    client.create(log, &MetadataSet::new()).await.unwrap();
    assert_eq!(client.append(log, b"hello").await.unwrap(), 1);
    assert_eq!(client.append(log, b"world").await.unwrap(), 2);

    let first = client.read(log, 1).await.unwrap();
    assert_eq!(first.recno, 1);
    assert_eq!(first.payload, b"hello");

    let missing = client.read(log, 3).await.unwrap_err();
    assert_eq!(missing.nak_code(), Command::NAK_C_NOTFOUND);
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    client.ping().await.unwrap();
    node.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_replicates_to_peer() {
    let replica = start("replica", &[]).await;
    let primary = start("primary", &[("replica", replica.addr)]).await;
    let mut client = client(&primary).await;
    let log = Name::parse("replicated");

    client.create(log, &MetadataSet::new()).await.unwrap();
    assert!(replica.server.registry().get(&log).is_some());
    assert_eq!(client.append(log, b"hello").await.unwrap(), 1);

    let copy = replica.server.registry().open(log).unwrap();
    assert_eq!(copy.store().last_recno(), 1);
    assert_eq!(copy.store().read(1).unwrap().payload, b"hello");

    // The replica applied the copy without forwarding it back.
    assert_eq!(replica.server.coordinator().stats().requests, 0);
    assert_eq!(primary.server.coordinator().pending_count(), 0);
    assert_eq!(primary.name, Name::parse("primary"));

    primary.server.shutdown();
    replica.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_replica_still_commits_locally() {
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = gone.local_addr().unwrap();
    drop(gone);

    let node = start("survivor", &[("dead", dead_addr)]).await;
    let mut client = client(&node).await;
    let log = Name::parse("lonely");

    client.create(log, &MetadataSet::new()).await.unwrap();
    assert_eq!(client.append(log, b"still here").await.unwrap(), 1);
    let store = node.server.registry().open(log).unwrap();
    assert_eq!(store.store().last_recno(), 1);

    node.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscription_follows_appends_until_shutdown() {
    let node = start("streamer", &[]).await;
    let log = Name::parse("feed");
    let handle = node
        .server
        .registry()
        .create(log, &MetadataSet::new())
        .unwrap();
    handle.store().append(b"backlog", Timestamp::now()).unwrap();

    let mut records = client(&node).await.subscribe(log, 1, 0).await.unwrap();
    let backlog = records.next().await.unwrap().unwrap();
    assert_eq!(backlog.recno, 1);
    assert_eq!(backlog.payload, b"backlog");

    let mut writer = client(&node).await;
    assert_eq!(writer.append(log, b"live").await.unwrap(), 2);

    let live = records.next().await.unwrap().unwrap();
    assert_eq!(live.recno, 2);
    assert_eq!(live.payload, b"live");

    node.server.shutdown();
    assert!(records.next().await.unwrap().is_none());
    assert!(records.next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_covers_every_request() {
    let node = start("full", &[]).await;
    let mut client = client(&node).await;
    let log = Name::parse("catalog");
    let mut metadata = MetadataSet::new();
    metadata.add(ids::XID, b"catalog").unwrap();

    client.create(log, &metadata).await.unwrap();
    let conflict = client.create(log, &metadata).await.unwrap_err();
    assert_eq!(conflict.nak_code(), Command::NAK_C_CONFLICT);
    assert_eq!(conflict.kind(), ErrorKind::AlreadyExists);

    for body in ["a", "b", "c", "d"] {
        client.append(log, body.as_bytes()).await.unwrap();
    }
    assert_eq!(client.open(log, true).await.unwrap(), 4);
    assert_eq!(client.open(log, false).await.unwrap(), 4);

    let range = client.multiread(log, 2, 2).await.unwrap();
    let recnos: Vec<u64> = range.iter().map(|r| r.recno).collect();
    assert_eq!(recnos, vec![2, 3]);
    assert_eq!(client.multiread(log, 1, 0).await.unwrap().len(), 4);

    let pinned = LogRecord::new(5, Timestamp::new(1_700_000_000, 0, 0).unwrap(), b"e".to_vec());
    assert_eq!(client.publish(log, &pinned).await.unwrap(), 5);
    let out_of_order = LogRecord::new(9, Timestamp::now(), b"z".to_vec());
    let forbidden = client.publish(log, &out_of_order).await.unwrap_err();
    assert_eq!(forbidden.nak_code(), Command::NAK_C_FORBIDDEN);
    assert_eq!(client.read(log, 5).await.unwrap().timestamp, pinned.timestamp);

    let fetched = client.metadata(log).await.unwrap();
    assert_eq!(fetched.find(ids::XID), Some(&b"catalog"[..]));

    let unknown = client.open(Name::parse("nowhere"), true).await.unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    client.close(log).await.unwrap();
    client.ping().await.unwrap();
    node.server.shutdown();
}

#[tokio::test(flavor = "current_thread")]
async fn requests_run_off_the_connection_task() {
    let node = start("single", &[]).await;
    let log = Name::parse("shared");
    let mut first = client(&node).await;
    let mut second = client(&node).await;

    first.create(log, &MetadataSet::new()).await.unwrap();
    let (a, b) = tokio::join!(first.append(log, b"one"), second.append(log, b"two"));
    let mut recnos = vec![a.unwrap(), b.unwrap()];
    recnos.sort_unstable();
    assert_eq!(recnos, vec![1, 2]);
    assert_eq!(second.multiread(log, 1, 0).await.unwrap().len(), 2);

    node.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_version_is_rejected() {
    let node = start("strict", &[]).await;
    let mut stream = TcpStream::connect(node.addr).await.unwrap();
    stream.write_all(&[9, 64, 0, 0, 0, 0, 0, 0]).await.unwrap();

    let nak = read_packet_async(&mut stream).await.unwrap().unwrap();
    assert_eq!(nak.command, Command::NAK_C_BADREQ);
    assert!(read_packet_async(&mut stream).await.unwrap().is_none());

    node.server.shutdown();
}
