//! Per-author feed: enqueue, sequence-ordered drain, and replay.
//!
//! Each feed runs as a per-author actor: messages are
//! enqueued onto an unbounded channel (so `add_message` never blocks the
//! caller), a single drainer task buffers out-of-order arrivals by
//! sequence number and, whenever the next contiguous sequence is
//! available, opens one write transaction that verifies the hash-chain
//! link against the feed's current tip, persists the message, appends the
//! global log, runs every registered hook, and only then commits and
//! publishes to the feed's topic.

use std::collections::BTreeMap;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::kv;
use crate::message::SignedMessage;
use crate::ref_::Ref;
use crate::store::hooks::HookRegistry;
use crate::topic::Topic;

fn feed_log_key(author: &Ref, sequence: u64) -> Vec<u8> {
    let mut key = author.db_key();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Live handle to one author's feed. Cheap to clone; the drainer task owns
/// the only receiving end of `tx`.
#[derive(Clone)]
pub struct Feed {
    pub author: Ref,
    tx: mpsc::UnboundedSender<SignedMessage>,
    pub topic: Topic,
    /// Held across "read the current tip" -> "subscribe to the topic" so a
    /// live follower never misses or duplicates a message crossing that
    /// boundary (see `Store::log`).
    pub(crate) handoff: Arc<Mutex<()>>,
}

impl Feed {
    pub(crate) fn spawn(
        author: Ref,
        db: Arc<Database>,
        hooks: Arc<HookRegistry>,
    ) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        let topic = Topic::new();
        let feed = Feed {
            author: author.clone(),
            tx,
            topic: topic.clone(),
            handoff: Arc::new(Mutex::new(())),
        };
        tokio::spawn(drain(author, db, hooks, topic, rx));
        feed
    }

    /// Non-blocking enqueue; the drainer applies ordering and durability.
    pub fn add_message(&self, msg: SignedMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Fatal("feed drainer task is gone".into()))
    }

    pub fn latest(&self, db: &Database) -> Result<Option<SignedMessage>> {
        let Some(seq_bytes) = kv::get_bytes(db, kv::FEED_META, &self.author.db_key())? else {
            return Ok(None);
        };
        let seq = u64::from_be_bytes(seq_bytes.try_into().unwrap_or([0; 8]));
        self.get_seq(db, seq)
    }

    pub fn get_seq(&self, db: &Database, sequence: u64) -> Result<Option<SignedMessage>> {
        let key = feed_log_key(&self.author, sequence);
        match kv::get_bytes(db, kv::FEED_LOG, &key)? {
            Some(bytes) => Ok(Some(
                SignedMessage::from_wire(&bytes)
                    .map_err(|e| Error::Protocol(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Last `n` messages whose content decodes to a known body type, newest
    /// first.
    pub fn latest_count_filtered(&self, db: &Database, n: usize) -> Result<Vec<SignedMessage>> {
        let latest = self.latest(db)?;
        let Some(latest) = latest else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(n);
        let mut seq = latest.message.sequence;
        loop {
            if out.len() >= n || seq == 0 {
                break;
            }
            if let Some(msg) = self.get_seq(db, seq)? {
                if crate::body::Body::decode(&msg.message.content).is_some() {
                    out.push(msg);
                }
            }
            seq -= 1;
        }
        Ok(out)
    }
}

async fn drain(
    author: Ref,
    db: Arc<Database>,
    hooks: Arc<HookRegistry>,
    topic: Topic,
    mut rx: mpsc::UnboundedReceiver<SignedMessage>,
) {
    let mut pending: BTreeMap<u64, SignedMessage> = BTreeMap::new();
    while let Some(msg) = rx.recv().await {
        pending.insert(msg.message.sequence, msg);
        loop {
            let next_seq = match current_seq(&db, &author) {
                Ok(s) => s + 1,
                Err(e) => {
                    tracing::error!(author = %author, error = %e, "failed reading feed tip");
                    break;
                }
            };
            let Some(candidate) = pending.get(&next_seq) else {
                break;
            };
            let candidate = candidate.clone();
            match commit_one(&db, &hooks, &author, &candidate) {
                Ok(()) => {
                    pending.remove(&next_seq);
                    topic.publish(candidate);
                }
                Err(e) => {
                    tracing::warn!(author = %author, seq = next_seq, error = %e, "rejecting message");
                    pending.remove(&next_seq);
                }
            }
        }

        // Anything buffered at or below the current tip can never become
        // contiguous (its slot is already committed, or it was superseded by
        // a conflicting message at the same sequence) and would otherwise
        // leak in `pending` forever.
        match current_seq(&db, &author) {
            Ok(tip) => pending.retain(|&seq, _| seq > tip),
            Err(e) => tracing::error!(author = %author, error = %e, "failed reading feed tip"),
        }
    }
}

fn current_seq(db: &Database, author: &Ref) -> Result<u64> {
    match kv::get_bytes(db, kv::FEED_META, &author.db_key())? {
        Some(bytes) => Ok(u64::from_be_bytes(bytes.try_into().unwrap_or([0; 8]))),
        None => Ok(0),
    }
}

fn commit_one(
    db: &Database,
    hooks: &HookRegistry,
    author: &Ref,
    msg: &SignedMessage,
) -> Result<()> {
    let prev_seq = current_seq(db, author)?;
    let prev = if prev_seq == 0 {
        None
    } else {
        let key = feed_log_key(author, prev_seq);
        match kv::get_bytes(db, kv::FEED_LOG, &key)? {
            Some(bytes) => Some(
                SignedMessage::from_wire(&bytes).map_err(|e| Error::Protocol(e.to_string()))?,
            ),
            None => None,
        }
    };
    msg.verify(prev.as_ref())
        .map_err(|e| Error::Validation(e.to_string()))?;

    let txn = db.begin_write()?;
    {
        let mut feed_log = txn.open_table(kv::FEED_LOG)?;
        let mut global_log = txn.open_table(kv::GLOBAL_LOG)?;
        let mut feed_meta = txn.open_table(kv::FEED_META)?;
        let mut pointer_idx = txn.open_table(kv::POINTER_IDX)?;

        let key = feed_log_key(author, msg.message.sequence);
        let wire = msg
            .to_wire(2)
            .map_err(|e| Error::Validation(e.to_string()))?;
        feed_log.insert(key.as_slice(), wire.as_slice())?;

        let global_seq = global_log.len()? + 1;
        global_log.insert(global_seq, key.as_slice())?;

        feed_meta.insert(author.db_key().as_slice(), &msg.message.sequence.to_be_bytes()[..])?;

        let msg_ref = msg
            .key()
            .map_err(|e| Error::Validation(e.to_string()))?;
        pointer_idx.insert(msg_ref.db_key().as_slice(), key.as_slice())?;
    }
    hooks.run_all(&txn, msg)?;
    txn.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn feed_commits_in_order_and_publishes() {
        let dir = tempdir().unwrap();
        let db = kv::open(&dir.path().join("s.redb")).unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let author = Ref::feed(key.verifying_key().to_bytes());
        let hooks = Arc::new(HookRegistry::new());
        let feed = Feed::spawn(author.clone(), db.clone(), hooks);

        let mut rx = feed.topic.subscribe();

        let m1 = crate::message::Message {
            previous: None,
            author: author.clone(),
            sequence: 1,
            timestamp: 1,
            hash: "sha256".into(),
            content: json!({"type": "post", "text": "one"}),
        }
        .sign(&key);
        feed.add_message(m1.clone()).unwrap();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.key().unwrap(), m1.key().unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let latest = feed.latest(&db).unwrap().unwrap();
        assert_eq!(latest.message.sequence, 1);
    }
}
