//! End-to-end scenarios exercising the store, the graph index, and the
//! blob store together, the way a node actually uses them.

use delta_ssb::index::graph;
use delta_ssb::{open_store, Ref};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::json;
use tempfile::tempdir;

fn identity() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

#[tokio::test]
async fn publishing_a_chain_of_messages_is_self_consistent() {
    let dir = tempdir().unwrap();
    let key = identity();
    let store = open_store(&dir.path().join("a.redb"), key).unwrap();

    let mut keys = Vec::new();
    for i in 0..5 {
        let msg = store
            .publish(json!({"type": "post", "text": format!("message {i}")}))
            .await
            .unwrap();
        assert_eq!(msg.message.sequence, i + 1);
        keys.push(msg.key().unwrap());
    }

    for (i, expected_key) in keys.iter().enumerate() {
        let stored = store.get_seq(&store.identity_ref(), i as u64 + 1).unwrap().unwrap();
        assert_eq!(&stored.key().unwrap(), expected_key);
    }

    let latest = store.latest(&store.identity_ref()).unwrap().unwrap();
    assert_eq!(latest.message.sequence, 5);
}

#[tokio::test]
async fn rebuild_reproduces_the_same_graph_index() {
    let dir = tempdir().unwrap();
    let a_key = identity();
    let store = open_store(&dir.path().join("b.redb"), a_key).unwrap();
    let own_ref = store.identity_ref();

    let contact = Ref::feed([42u8; 32]);
    store
        .publish(json!({"type": "contact", "contact": contact.to_string_form(), "following": true}))
        .await
        .unwrap();

    let before = graph::get_follows(store.db(), &own_ref, 1).unwrap();
    assert_eq!(before.get(&contact), Some(&1));

    store.rebuild_all().unwrap();

    let after = graph::get_follows(store.db(), &own_ref, 1).unwrap();
    assert_eq!(after.get(&contact), Some(&1));
}

#[tokio::test]
async fn out_of_order_arrival_is_buffered_until_contiguous() {
    use delta_ssb::message::Message;

    let dir = tempdir().unwrap();
    let key = identity();
    let author = Ref::feed(key.verifying_key().to_bytes());
    let store = open_store(&dir.path().join("c.redb"), SigningKey::from_bytes(&key.to_bytes())).unwrap();

    let first = Message {
        previous: None,
        author: author.clone(),
        sequence: 1,
        timestamp: 1,
        hash: "sha256".into(),
        content: json!({"type": "post", "text": "one"}),
    }
    .sign(&key);
    let second = Message {
        previous: Some(first.key().unwrap()),
        author: author.clone(),
        sequence: 2,
        timestamp: 2,
        hash: "sha256".into(),
        content: json!({"type": "post", "text": "two"}),
    }
    .sign(&key);

    // Deliver out of order: second arrives first and must wait.
    store.add_message(second.clone()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(store.latest(&author).unwrap().is_none());

    store.add_message(first.clone()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let latest = store.latest(&author).unwrap().unwrap();
    assert_eq!(latest.message.sequence, 2);
}

#[test]
fn blob_store_is_content_addressed() {
    let dir = tempdir().unwrap();
    let blobs = delta_ssb::blob::BlobStore::open(dir.path()).unwrap();
    let content = b"a blob's content determines its own address";
    let r = blobs.add(content).unwrap();
    assert!(blobs.has(&r));
    assert_eq!(blobs.get(&r).unwrap().unwrap(), content);
}

#[tokio::test]
async fn duplicate_insert_is_idempotent() {
    use delta_ssb::kv;
    use redb::ReadableTable;

    let dir = tempdir().unwrap();
    let key = identity();
    let store = open_store(&dir.path().join("dup.redb"), key).unwrap();

    let msg = store.publish(json!({"type": "post", "text": "once"})).await.unwrap();
    store.add_message(msg.clone()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let txn = store.db().begin_read().unwrap();
    let global_log = txn.open_table(kv::GLOBAL_LOG).unwrap();
    assert_eq!(global_log.len().unwrap(), 1);

    let latest = store.latest(&store.identity_ref()).unwrap().unwrap();
    assert_eq!(latest.message.sequence, 1);
}

#[tokio::test]
async fn hash_chain_break_is_rejected() {
    use delta_ssb::message::Message;

    let dir = tempdir().unwrap();
    let key = identity();
    let author = Ref::feed(key.verifying_key().to_bytes());
    let store = open_store(&dir.path().join("break.redb"), SigningKey::from_bytes(&key.to_bytes())).unwrap();

    let m1 = Message {
        previous: None,
        author: author.clone(),
        sequence: 1,
        timestamp: 1,
        hash: "sha256".into(),
        content: json!({"type": "post", "text": "one"}),
    }
    .sign(&key);
    store.add_message(m1.clone()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let broken = Message {
        previous: Some(Ref::message([7u8; 32])),
        author: author.clone(),
        sequence: 2,
        timestamp: 2,
        hash: "sha256".into(),
        content: json!({"type": "post", "text": "forged"}),
    }
    .sign(&key);
    store.add_message(broken).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let latest = store.latest(&author).unwrap().unwrap();
    assert_eq!(latest.key().unwrap(), m1.key().unwrap());
}

#[tokio::test]
async fn cross_peer_blob_want_fetches_from_a_connected_peer() {
    use delta_ssb::peers::PeerRegistry;
    use delta_ssb::rpc::methods::{register_builtins, MethodRegistry};
    use delta_ssb::rpc::Connection;
    use delta_ssb::{blob::BlobStore, transport};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let store_a = Arc::new(open_store(&dir_a.path().join("a.redb"), identity()).unwrap());
    let store_b = Arc::new(open_store(&dir_b.path().join("b.redb"), identity()).unwrap());

    let blobs_a = Arc::new(BlobStore::open(dir_a.path().join("blobs")).unwrap());
    let blobs_b = Arc::new(BlobStore::open(dir_b.path().join("blobs")).unwrap());
    let content = b"content only peer B has on disk";
    let blob_ref = blobs_b.add(content).unwrap();

    let mut registry_b = MethodRegistry::new();
    register_builtins(&mut registry_b, store_b.clone(), blobs_b.clone());
    let registry_b = Arc::new(registry_b);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let identity_b = identity();
    let verifying_b = identity_b.verifying_key();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let conn = transport::accept(socket, &identity_b, transport::DEFAULT_CAPS)
            .await
            .unwrap();
        let rpc = Connection::new(conn);
        let _ = rpc.serve(registry_b).await;
    });

    let identity_a = identity();
    let tcp = TcpStream::connect(addr).await.unwrap();
    let expected_peer = Ref::feed(verifying_b.to_bytes());
    let conn_a = transport::connect(tcp, &identity_a, Some(&expected_peer), transport::DEFAULT_CAPS)
        .await
        .unwrap();
    let peer_identity = conn_a.peer_identity.clone();
    let rpc_a = Connection::new(conn_a);
    let empty_registry_a = Arc::new(MethodRegistry::new());
    tokio::spawn(rpc_a.clone().serve(empty_registry_a));

    let peers_a = PeerRegistry::new();
    peers_a.register(peer_identity, rpc_a);

    blobs_a.want(blob_ref.clone(), peers_a);
    tokio::time::timeout(std::time::Duration::from_secs(5), blobs_a.wait_for(&blob_ref))
        .await
        .expect("blob fetch timed out");

    assert_eq!(blobs_a.get(&blob_ref).unwrap().unwrap(), content);
}

#[tokio::test]
async fn two_node_follow_replication_transfers_all_messages() {
    use delta_ssb::blob::BlobStore;
    use delta_ssb::message::{SignedMessage, SignedMessageJson};
    use delta_ssb::rpc::methods::{register_builtins, MethodRegistry};
    use delta_ssb::rpc::Connection;
    use delta_ssb::transport;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let identity_a = identity();
    let author = Ref::feed(identity_a.verifying_key().to_bytes());
    let store_a = Arc::new(open_store(&dir_a.path().join("a.redb"), identity_a).unwrap());
    let store_b = Arc::new(open_store(&dir_b.path().join("b.redb"), identity()).unwrap());
    let blobs_a = Arc::new(BlobStore::open(dir_a.path().join("blobs")).unwrap());

    // Scaled down from the reference scenario's 50 posts for test speed;
    // the replication path doesn't care about the count.
    let mut published = Vec::new();
    for i in 0..5 {
        published.push(store_a.publish(json!({"type": "post", "text": format!("post {i}")})).await.unwrap());
    }

    let mut registry_a = MethodRegistry::new();
    register_builtins(&mut registry_a, store_a.clone(), blobs_a);
    let registry_a = Arc::new(registry_a);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let identity_a_server = identity();
    let verifying_a_server = identity_a_server.verifying_key();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let conn = transport::accept(socket, &identity_a_server, transport::DEFAULT_CAPS)
            .await
            .unwrap();
        let rpc = Connection::new(conn);
        let _ = rpc.serve(registry_a).await;
    });

    let identity_b_client = identity();
    let tcp = TcpStream::connect(addr).await.unwrap();
    let expected_peer = Ref::feed(verifying_a_server.to_bytes());
    let conn_b = transport::connect(tcp, &identity_b_client, Some(&expected_peer), transport::DEFAULT_CAPS)
        .await
        .unwrap();
    let rpc_b = Connection::new(conn_b);
    let empty_registry_b = Arc::new(MethodRegistry::new());
    tokio::spawn(rpc_b.clone().serve(empty_registry_b));

    let args = serde_json::json!({ "id": author.to_string_form(), "seq": 1, "live": false });
    let mut rx = rpc_b.call(&["createHistoryStream"], args, true).await.unwrap();
    let mut received = Vec::new();
    while let Some(frame) = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("history stream timed out")
    {
        if frame.end_or_err {
            break;
        }
        let j: SignedMessageJson = serde_json::from_slice(&frame.body).unwrap();
        let signed = SignedMessage::try_from(&j).unwrap();
        store_b.add_message(signed.clone()).unwrap();
        received.push(signed);
    }

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(received.len(), published.len());
    let latest_b = store_b.latest(&author).unwrap().unwrap();
    assert_eq!(latest_b.message.sequence, published.len() as u64);
}
