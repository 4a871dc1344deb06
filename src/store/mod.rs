//! The feed store: process-wide open handle over the embedded database,
//! lazily-spawned per-author feed actors, and the hook pipeline that index
//! plug-ins register into.

pub mod feed;
pub mod hooks;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use ed25519_dalek::SigningKey;
use redb::{Database, ReadableTable};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::kv;
use crate::message::{Message, SignedMessage};
use crate::ref_::Ref;
use feed::Feed;
use hooks::{Hook, HookRegistry};

/// Components a plug-in registers at `OpenStore` time: its hook (if it has
/// one) plus a name used only for logging/rebuild bookkeeping.
pub struct Plugin {
    pub hook: Box<dyn Hook>,
}

pub struct StoreBuilder {
    plugins: Vec<Plugin>,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        StoreBuilder { plugins: Vec::new() }
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn open(self, path: &Path, identity: SigningKey) -> Result<Store> {
        let db = kv::open(path)?;
        let mut registry = HookRegistry::new();
        for plugin in self.plugins {
            registry.register(plugin.hook);
        }
        Ok(Store {
            db,
            path: path.to_path_buf(),
            hooks: Arc::new(registry),
            feeds: RwLock::new(HashMap::new()),
            identity,
        })
    }
}

pub struct Store {
    db: Arc<Database>,
    path: PathBuf,
    hooks: Arc<HookRegistry>,
    feeds: RwLock<HashMap<Ref, Feed>>,
    identity: SigningKey,
}

impl Store {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity_ref(&self) -> Ref {
        Ref::feed(self.identity.verifying_key().to_bytes())
    }

    /// Lazily spawn (or return the existing) per-author feed actor.
    pub fn feed(&self, author: &Ref) -> Feed {
        if let Some(existing) = self.feeds.read().expect("feeds lock poisoned").get(author) {
            return existing.clone();
        }
        let mut feeds = self.feeds.write().expect("feeds lock poisoned");
        feeds
            .entry(author.clone())
            .or_insert_with(|| Feed::spawn(author.clone(), self.db.clone(), self.hooks.clone()))
            .clone()
    }

    /// Append a message of unknown origin (replication, e.g.) to its
    /// author's feed.
    pub fn add_message(&self, msg: SignedMessage) -> Result<()> {
        self.feed(&msg.message.author).add_message(msg)
    }

    /// Sign and append `content` to our own feed, waiting until it is
    /// durably committed and visible to subscribers before returning:
    /// registers on the topic before enqueuing so it can block for its own
    /// key to reappear.
    pub async fn publish(&self, content: Value) -> Result<SignedMessage> {
        let author = self.identity_ref();
        let feed = self.feed(&author);
        let mut rx = feed.topic.subscribe();

        let latest = feed.latest(&self.db)?;
        let (previous, sequence, min_ts) = match &latest {
            Some(m) => (Some(m.key().map_err(|e| Error::Validation(e.to_string()))?), m.message.sequence + 1, m.message.timestamp + 1),
            None => (None, 1, 0),
        };
        let timestamp = std::cmp::max(min_ts, now_ms());

        let message = Message {
            previous,
            author: author.clone(),
            sequence,
            timestamp,
            hash: "sha256".into(),
            content,
        };
        let signed = message.sign(&self.identity);
        let wanted_key = signed.key().map_err(|e| Error::Validation(e.to_string()))?;
        feed.add_message(signed.clone())?;

        loop {
            let got = rx
                .recv()
                .await
                .map_err(|_| Error::Fatal("topic closed before publish committed".into()))?;
            if got.key().map_err(|e| Error::Validation(e.to_string()))? == wanted_key {
                return Ok(got);
            }
        }
    }

    pub fn latest(&self, author: &Ref) -> Result<Option<SignedMessage>> {
        self.feed(author).latest(&self.db)
    }

    pub fn get_seq(&self, author: &Ref, sequence: u64) -> Result<Option<SignedMessage>> {
        self.feed(author).get_seq(&self.db, sequence)
    }

    pub fn latest_count_filtered(&self, author: &Ref, n: usize) -> Result<Vec<SignedMessage>> {
        self.feed(author).latest_count_filtered(&self.db, n)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Clear every plug-in's tables, then replay the global log through
    /// the hook pipeline from the beginning. Used after adding a new index
    /// plug-in, or to recover from index corruption.
    pub fn rebuild_all(&self) -> Result<()> {
        tracing::info!("rebuild starting");
        let txn = self.db.begin_write()?;
        self.hooks.clear_all(&txn)?;
        let mut count = 0u64;
        {
            let global_log = txn.open_table(kv::GLOBAL_LOG)?;
            let feed_log = txn.open_table(kv::FEED_LOG)?;
            for entry in global_log.iter()? {
                let (_, pointer) = entry?;
                let Some(wire) = feed_log.get(pointer.value())?.map(|v| v.value().to_vec()) else {
                    continue;
                };
                let msg = SignedMessage::from_wire(&wire)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                self.hooks.run_all(&txn, &msg)?;
                count += 1;
            }
        }
        txn.commit()?;
        tracing::info!(count, "rebuild finished");
        Ok(())
    }

    /// Clear one named plug-in's tables, then replay the global log through
    /// only that plug-in's hook.
    pub fn rebuild(&self, module: &str) -> Result<()> {
        tracing::info!(module, "rebuild starting");
        let txn = self.db.begin_write()?;
        if !self.hooks.clear_one(&txn, module)? {
            return Err(Error::NotFound(format!("no index plug-in named {module}")));
        }
        let mut count = 0u64;
        {
            let global_log = txn.open_table(kv::GLOBAL_LOG)?;
            let feed_log = txn.open_table(kv::FEED_LOG)?;
            for entry in global_log.iter()? {
                let (_, pointer) = entry?;
                let Some(wire) = feed_log.get(pointer.value())?.map(|v| v.value().to_vec()) else {
                    continue;
                };
                let msg = SignedMessage::from_wire(&wire)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                self.hooks.run_one(&txn, module, &msg)?;
                count += 1;
            }
        }
        txn.commit()?;
        tracing::info!(count, module, "rebuild finished");
        Ok(())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn publish_then_latest_round_trips() {
        let dir = tempdir().unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let store = StoreBuilder::new()
            .open(&dir.path().join("s.redb"), key)
            .unwrap();

        let published = store.publish(json!({"type": "post", "text": "hi"})).await.unwrap();
        assert_eq!(published.message.sequence, 1);

        let latest = store.latest(&store.identity_ref()).unwrap().unwrap();
        assert_eq!(latest.key().unwrap(), published.key().unwrap());
    }

    #[tokio::test]
    async fn sequential_publishes_chain_correctly() {
        let dir = tempdir().unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let store = StoreBuilder::new()
            .open(&dir.path().join("s.redb"), key)
            .unwrap();

        let first = store.publish(json!({"type": "post", "text": "one"})).await.unwrap();
        let second = store.publish(json!({"type": "post", "text": "two"})).await.unwrap();
        assert_eq!(second.message.sequence, 2);
        assert_eq!(second.message.previous, Some(first.key().unwrap()));
    }
}
