//! Content-addressed blob store and want/has gossip.
//!
//! Blobs live on disk under their sha256 ref, split into the first two hex
//! bytes as a directory prefix so no single directory accumulates millions
//! of entries. `want()` is the gossip side: register
//! interest in a ref we don't have, then ask every currently connected peer
//! `blobs.has`/`blobs.get` until one produces it, hash-verify, and store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Notify;

use crate::peers::PeerRegistry;
use crate::ref_::Ref;
use crate::rpc::{self, BodyType};

/// How long a want-worker waits after a pass over every connected peer
/// comes up empty before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BlobError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("blob ref does not match content hash")]
    HashMismatch,
    #[error("not a blob ref")]
    NotABlobRef,
}

pub struct BlobStore {
    root: PathBuf,
    /// Refs we've announced wanting but haven't received yet.
    wants: Mutex<HashSet<Ref>>,
    /// Broadcast whenever a blob lands, so `wait_for` callers can wake up.
    notify: Notify,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(BlobStore {
            root,
            wants: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    fn path_for(&self, blob_ref: &Ref) -> PathBuf {
        let hex = hex::encode(&blob_ref.data);
        let (prefix, rest) = hex.split_at(2.min(hex.len()));
        self.root.join(prefix).join(rest)
    }

    pub fn has(&self, blob_ref: &Ref) -> bool {
        self.path_for(blob_ref).is_file()
    }

    pub fn get(&self, blob_ref: &Ref) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.path_for(blob_ref);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    pub fn size(&self, blob_ref: &Ref) -> Result<Option<u64>, BlobError> {
        let path = self.path_for(blob_ref);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `content`, hashing it to derive (and verify, if a ref is
    /// already known for it) its content address.
    pub fn add(&self, content: &[u8]) -> Result<Ref, BlobError> {
        let digest = Sha256::digest(content);
        let blob_ref = Ref::blob(digest.into());
        let path = self.path_for(&blob_ref);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        self.wants.lock().expect("wants lock poisoned").remove(&blob_ref);
        self.notify.notify_waiters();
        Ok(blob_ref)
    }

    /// Store `content` against a specific ref, rejecting it if the hash
    /// doesn't match — used when a peer pushes us a blob we asked for.
    pub fn put_verified(&self, blob_ref: &Ref, content: &[u8]) -> Result<(), BlobError> {
        blob_ref.check_hash(content).map_err(|_| BlobError::HashMismatch)?;
        let path = self.path_for(blob_ref);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        self.wants.lock().expect("wants lock poisoned").remove(blob_ref);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Register interest in `blob_ref`, spawning a worker that asks every
    /// connected peer for it until one delivers it (or we already have it).
    /// A second `want()` call for a ref already being fetched is a no-op.
    pub fn want(self: &Arc<Self>, blob_ref: Ref, peers: Arc<PeerRegistry>) {
        if self.has(&blob_ref) {
            return;
        }
        {
            let mut wants = self.wants.lock().expect("wants lock poisoned");
            if !wants.insert(blob_ref.clone()) {
                return;
            }
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.want_worker(blob_ref, peers).await;
        });
    }

    async fn want_worker(self: Arc<Self>, blob_ref: Ref, peers: Arc<PeerRegistry>) {
        loop {
            if self.has(&blob_ref) {
                self.wants.lock().expect("wants lock poisoned").remove(&blob_ref);
                self.notify.notify_waiters();
                return;
            }
            for (_peer, conn) in peers.snapshot() {
                match fetch_from(&conn, &blob_ref).await {
                    Ok(Some(content)) if self.put_verified(&blob_ref, &content).is_ok() => return,
                    _ => continue,
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Block until `blob_ref` is present, for callers (e.g. a thread
    /// renderer) that need the content before they can proceed.
    pub async fn wait_for(&self, blob_ref: &Ref) {
        loop {
            if self.has(blob_ref) {
                return;
            }
            let notified = self.notify.notified();
            if self.has(blob_ref) {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
    }

    pub fn wanted(&self) -> Vec<Ref> {
        self.wants
            .lock()
            .expect("wants lock poisoned")
            .iter()
            .filter(|r| !self.has(r))
            .cloned()
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Ask one peer `blobs.has`, and if it says yes, pull the content via
/// `blobs.get`. Returns `Ok(None)` for "this peer doesn't have it" and
/// `Err` only for a transport-level failure worth skipping this peer for.
async fn fetch_from(conn: &rpc::Connection, blob_ref: &Ref) -> Result<Option<Vec<u8>>, rpc::RpcError> {
    let arg = Value::String(blob_ref.to_string_form());
    let mut has_rx = conn.call(&["blobs", "has"], arg.clone(), false).await?;
    let Some(frame) = has_rx.recv().await else {
        return Ok(None);
    };
    let has: bool = serde_json::from_slice(&frame.body).unwrap_or(false);
    if !has {
        return Ok(None);
    }

    let mut get_rx = conn.call(&["blobs", "get"], arg, true).await?;
    let mut buf = Vec::new();
    while let Some(frame) = get_rx.recv().await {
        if frame.end_or_err {
            if frame.body_type == BodyType::Utf8 {
                return Ok(None);
            }
            break;
        }
        buf.extend_from_slice(&frame.body);
    }
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let r = store.add(b"hello world").unwrap();
        assert!(store.has(&r));
        assert_eq!(store.get(&r).unwrap(), Some(b"hello world".to_vec()));
    }

    #[test]
    fn put_verified_rejects_mismatched_hash() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let wrong_ref = Ref::blob([0u8; 32]);
        assert!(matches!(
            store.put_verified(&wrong_ref, b"hello"),
            Err(BlobError::HashMismatch)
        ));
    }

    #[tokio::test]
    async fn want_is_cleared_once_fetched_locally() {
        let dir = tempdir().unwrap();
        let store = Arc::new(BlobStore::open(dir.path()).unwrap());
        let digest = Sha256::digest(b"data");
        let r = Ref::blob(digest.into());
        let peers = PeerRegistry::new();
        store.want(r.clone(), peers);
        assert_eq!(store.wanted(), vec![r.clone()]);
        store.add(b"data").unwrap();
        assert!(store.wanted().is_empty());
    }
}
