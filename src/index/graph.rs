//! The follow/block graph index.
//!
//! Stores one relation per (author, contact) pair, key-prefixed by the
//! author's db key so a feed's outgoing edges scan contiguously. Mirrors
//! `graph.go`'s `graph/<author>/<contact> -> {following, blocking}` bucket
//! layout and `GetFollows`'s breadth-first walk.

use std::collections::HashMap;

use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kv;
use crate::message::SignedMessage;
use crate::ref_::{Ref, RefType};
use crate::store::hooks::Hook;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Relation {
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub blocking: bool,
}

fn edge_key(author: &Ref, contact: &Ref) -> Vec<u8> {
    let mut key = author.db_key();
    key.extend_from_slice(&contact.db_key());
    key
}

pub struct GraphHook;

impl Hook for GraphHook {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn on_message(&self, txn: &WriteTransaction, msg: &SignedMessage) -> Result<()> {
        let Some(crate::body::Body::Contact { contact, following, blocking }) =
            crate::body::Body::decode(&msg.message.content)
        else {
            return Ok(());
        };
        if contact.kind != RefType::Feed {
            return Ok(());
        }
        let mut table = txn.open_table(kv::GRAPH)?;
        let key = edge_key(&msg.message.author, &contact);
        let mut relation: Relation = table
            .get(key.as_slice())?
            .and_then(|v| serde_json::from_slice(v.value()).ok())
            .unwrap_or_default();
        if let Some(f) = following {
            relation.following = f;
        }
        if let Some(b) = blocking {
            relation.blocking = b;
        }
        let buf = serde_json::to_vec(&relation)?;
        table.insert(key.as_slice(), buf.as_slice())?;
        Ok(())
    }

    fn clear(&self, txn: &WriteTransaction) -> Result<()> {
        txn.delete_table(kv::GRAPH)?;
        txn.open_table(kv::GRAPH)?;
        Ok(())
    }
}

/// Breadth-first walk of the follow graph up to `depth` hops, returning
/// every reached feed mapped to the hop count at which it was first seen.
pub fn get_follows(db: &redb::Database, feed: &Ref, depth: usize) -> Result<HashMap<Ref, usize>> {
    let mut follows = HashMap::new();
    follows.insert(feed.clone(), 0usize);

    let txn = db.begin_read()?;
    let table = match txn.open_table(kv::GRAPH) {
        Ok(t) => t,
        Err(_) => return Ok(follows),
    };

    for level in 0..depth {
        let frontier: Vec<Ref> = follows
            .iter()
            .filter(|(_, &d)| d == level)
            .map(|(k, _)| k.clone())
            .collect();
        for author in frontier {
            let prefix = author.db_key();
            let range_start = prefix.clone();
            let mut range_end = prefix.clone();
            range_end.push(0xff);
            for entry in table.range::<&[u8]>(range_start.as_slice()..=range_end.as_slice())? {
                let (key, value) = entry?;
                let contact_bytes = &key.value()[prefix.len()..];
                let Ok(contact) = Ref::from_db_key(contact_bytes) else {
                    continue;
                };
                if follows.contains_key(&contact) {
                    continue;
                }
                let relation: Relation = serde_json::from_slice(value.value()).unwrap_or_default();
                if relation.following {
                    follows.insert(contact, level + 1);
                }
            }
        }
    }
    Ok(follows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn follows_one_hop_reachable() {
        let dir = tempdir().unwrap();
        let db = kv::open(&dir.path().join("s.redb")).unwrap();
        let a = Ref::feed([1u8; 32]);
        let b = Ref::feed([2u8; 32]);

        let hook = GraphHook;
        let txn = db.begin_write().unwrap();
        let key_a = SigningKey::from_bytes(&[1u8; 32]);
        let msg = crate::message::Message {
            previous: None,
            author: a.clone(),
            sequence: 1,
            timestamp: 1,
            hash: "sha256".into(),
            content: json!({"type": "contact", "contact": b.to_string_form(), "following": true}),
        }
        .sign(&key_a);
        hook.on_message(&txn, &msg).unwrap();
        txn.commit().unwrap();

        let follows = get_follows(&db, &a, 2).unwrap();
        assert_eq!(follows.get(&b), Some(&1));
    }
}
