//! Replication: serving `createHistoryStream` to peers, and the outbound
//! dial loop that decides which peers to connect to and which feeds to ask
//! them for.
//!
//! The dial loop runs a round-robin pub queue on a fixed tick, skips
//! peers it already holds an open session with, and drives
//! replication two hops out along the follow graph (you replicate who you
//! follow, and who they follow) rather than only your direct follows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;
use crate::index::{graph, pubs};
use crate::message::SignedMessage;
use crate::peers::PeerRegistry;
use crate::ref_::Ref;
use crate::store::Store;
use crate::transport;

/// A session with any one peer is capped at this long; past it the dial
/// loop closes the connection and lets the next tick redial if still
/// relevant. Keeps one slow/stuck peer from starving the dial queue.
pub const SESSION_CAP: Duration = Duration::from_secs(5 * 60);
const DIAL_TICK: Duration = Duration::from_secs(5);
const FOLLOW_DEPTH: usize = 2;
/// Caps the number of pub sessions the dial loop holds open at once.
const MAX_ACTIVE_CONNECTIONS: usize = 3;
/// Successive `createHistoryStream` calls within one pub session are spaced
/// out by `index * STAGGER_DELAY` so a feed-heavy follow graph doesn't open
/// dozens of streams in the same instant.
const STAGGER_DELAY: Duration = Duration::from_millis(200);

/// Feed a `createHistoryStream` request: catch up on persisted messages
/// from `from_seq` onward, then, if `live`, keep forwarding newly
/// committed messages. The handoff lock ensures no message committed
/// between the last catch-up read and the live subscription is dropped or
/// delivered twice.
pub async fn drive_history_stream(
    store: Arc<Store>,
    author: Ref,
    from_seq: u64,
    live: bool,
    tx: mpsc::UnboundedSender<serde_json::Value>,
) -> Result<()> {
    let feed = store.feed(&author);
    let handoff = feed.handoff.clone();
    let guard = handoff.lock().await;

    let mut seq = from_seq;
    let mut live_rx = None;
    loop {
        match feed.get_seq(store.db(), seq)? {
            Some(msg) => {
                if tx.send(to_json(&msg)).is_err() {
                    return Ok(());
                }
                seq += 1;
            }
            None => {
                if live {
                    live_rx = Some(feed.topic.subscribe());
                }
                break;
            }
        }
    }
    drop(guard);

    if let Some(mut rx) = live_rx {
        while let Ok(msg) = rx.recv().await {
            if msg.message.sequence < seq {
                continue;
            }
            if tx.send(to_json(&msg)).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn to_json(msg: &SignedMessage) -> serde_json::Value {
    let j = crate::message::SignedMessageJson::try_from(msg).expect("message always encodes");
    serde_json::to_value(j).expect("SignedMessageJson always serializes")
}

/// Outbound dial loop: every tick, while fewer than `MAX_ACTIVE_CONNECTIONS`
/// sessions are open, pick the next pub we don't currently hold a session
/// with and connect, then request history streams for every feed up to
/// `FOLLOW_DEPTH` hops out in the follow graph.
pub async fn dial_loop(
    store: Arc<Store>,
    identity: SigningKey,
    caps: Vec<u8>,
    peers: Arc<PeerRegistry>,
    registry: Arc<crate::rpc::methods::MethodRegistry>,
) {
    let connected: Arc<Mutex<HashSet<Ref>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut tick = tokio::time::interval(DIAL_TICK);
    loop {
        tick.tick().await;
        let Ok(known_pubs) = pubs::list_pubs(store.db()) else {
            continue;
        };
        for pub_record in known_pubs {
            let target = pub_record.key.clone();
            {
                let mut guard = connected.lock().await;
                if guard.len() >= MAX_ACTIVE_CONNECTIONS || guard.contains(&target) {
                    continue;
                }
                guard.insert(target.clone());
            }
            let store = store.clone();
            let identity = identity.clone();
            let caps = caps.clone();
            let connected = connected.clone();
            let peers = peers.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                let result = replicate_with_pub(store, identity, caps, pub_record, peers, registry).await;
                if let Err(e) = result {
                    tracing::warn!(peer = %target, error = %e, "replication session ended");
                }
                connected.lock().await.remove(&target);
            });
        }
    }
}

async fn replicate_with_pub(
    store: Arc<Store>,
    identity: SigningKey,
    caps: Vec<u8>,
    pub_record: pubs::PubRecord,
    peers: Arc<PeerRegistry>,
    registry: Arc<crate::rpc::methods::MethodRegistry>,
) -> Result<()> {
    let addr = format!("{}:{}", pub_record.host, pub_record.port);
    let tcp = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(crate::error::Error::Io)?;
    let conn = tokio::time::timeout(
        SESSION_CAP,
        transport::connect(tcp, &identity, Some(&pub_record.key), &caps),
    )
    .await
    .map_err(|_| crate::error::Error::Transient("handshake timed out".into()))?
    .map_err(|e| crate::error::Error::Protocol(e.to_string()))?;

    let peer_identity = conn.peer_identity.clone();
    let rpc = crate::rpc::Connection::new(conn);
    peers.register(peer_identity.clone(), rpc.clone());
    // Mux-RPC is symmetric: this side must also drive frame reads (our own
    // replies included) and answer any call the pub makes back to us.
    tokio::spawn(rpc.clone().serve(registry));

    let own_ref = Ref::feed(identity.verifying_key().to_bytes());
    let mut follows: Vec<(Ref, usize)> = graph::get_follows(store.db(), &own_ref, FOLLOW_DEPTH)?
        .into_iter()
        .collect();
    follows.sort_by_key(|(r, _)| r.to_string_form());

    for (index, (feed_ref, _hops)) in follows.into_iter().enumerate() {
        let store = store.clone();
        let rpc = rpc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STAGGER_DELAY * index as u32).await;
            let latest_seq = store.latest(&feed_ref).ok().flatten().map(|m| m.message.sequence + 1).unwrap_or(1);
            let args = serde_json::json!({ "id": feed_ref.to_string_form(), "seq": latest_seq, "live": true });
            if let Ok(mut rx) = rpc.call(&["createHistoryStream"], args, true).await {
                while let Some(frame) = rx.recv().await {
                    if frame.end_or_err {
                        break;
                    }
                    if let Ok(j) = serde_json::from_slice::<crate::message::SignedMessageJson>(&frame.body) {
                        if let Ok(signed) = crate::message::SignedMessage::try_from(&j) {
                            let _ = store.add_message(signed);
                        }
                    }
                }
            }
        });
    }

    tokio::time::sleep(SESSION_CAP).await;
    peers.deregister(&peer_identity);
    Ok(())
}
